//! Report renderers.
//!
//! Converts coverage records into the three artifact forms the lane
//! publishes: a textual summary table, a Cobertura-compatible XML document,
//! and a minimal static HTML index.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{CoverageError, CoverageRecords};

/// Paths of the rendered artifacts
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub summary: PathBuf,
    pub xml: PathBuf,
    pub html: PathBuf,
}

/// Render the textual summary table.
///
/// Matches the familiar Name/Stmts/Miss/Cover layout with a TOTAL row.
pub fn render_summary(records: &CoverageRecords) -> String {
    let name_width = records
        .files
        .keys()
        .map(|p| p.len())
        .chain(std::iter::once("Name".len()))
        .chain(std::iter::once("TOTAL".len()))
        .max()
        .unwrap_or(4);

    let mut out = String::new();
    out.push_str(&format!(
        "{:<width$}  {:>7}  {:>6}  {:>6}\n",
        "Name",
        "Stmts",
        "Miss",
        "Cover",
        width = name_width
    ));
    out.push_str(&"-".repeat(name_width + 25));
    out.push('\n');

    for (path, record) in &records.files {
        out.push_str(&format!(
            "{:<width$}  {:>7}  {:>6}  {:>5.0}%\n",
            path,
            record.statements(),
            record.missed(),
            record.percent(),
            width = name_width
        ));
    }

    let totals = records.totals();
    out.push_str(&"-".repeat(name_width + 25));
    out.push('\n');
    out.push_str(&format!(
        "{:<width$}  {:>7}  {:>6}  {:>5.0}%\n",
        "TOTAL",
        totals.statements,
        totals.missed,
        totals.percent,
        width = name_width
    ));
    out
}

/// Render a Cobertura-compatible XML document
pub fn render_xml(records: &CoverageRecords) -> String {
    let totals = records.totals();
    let line_rate = totals.percent / 100.0;

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<coverage line-rate=\"{:.4}\" lines-valid=\"{}\" lines-covered=\"{}\" version=\"1\">\n",
        line_rate,
        totals.statements,
        totals.statements - totals.missed
    ));
    out.push_str("  <packages>\n    <package name=\"all\">\n      <classes>\n");

    for (path, record) in &records.files {
        out.push_str(&format!(
            "        <class name=\"{}\" filename=\"{}\" line-rate=\"{:.4}\">\n",
            xml_escape(path),
            xml_escape(path),
            record.percent() / 100.0
        ));
        out.push_str("          <lines>\n");
        for line in &record.executed {
            out.push_str(&format!(
                "            <line number=\"{}\" hits=\"1\"/>\n",
                line
            ));
        }
        for line in &record.missing {
            out.push_str(&format!(
                "            <line number=\"{}\" hits=\"0\"/>\n",
                line
            ));
        }
        out.push_str("          </lines>\n        </class>\n");
    }

    out.push_str("      </classes>\n    </package>\n  </packages>\n</coverage>\n");
    out
}

/// Render a minimal static HTML index
pub fn render_html(records: &CoverageRecords) -> String {
    let totals = records.totals();

    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head><title>Coverage report</title></head>\n<body>\n");
    out.push_str(&format!(
        "<h1>Coverage report: {:.0}%</h1>\n",
        totals.percent
    ));
    out.push_str("<table>\n<tr><th>Name</th><th>Stmts</th><th>Miss</th><th>Cover</th></tr>\n");

    for (path, record) in &records.files {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.0}%</td></tr>\n",
            html_escape(path),
            record.statements(),
            record.missed(),
            record.percent()
        ));
    }

    out.push_str(&format!(
        "<tr><td>TOTAL</td><td>{}</td><td>{}</td><td>{:.0}%</td></tr>\n",
        totals.statements, totals.missed, totals.percent
    ));
    out.push_str("</table>\n</body>\n</html>\n");
    out
}

/// Write all three artifact forms under `dir`.
///
/// Produces `coverage_summary.txt`, `coverage.xml`, and
/// `htmlcov/index.html`.
pub fn write_artifacts(records: &CoverageRecords, dir: &Path) -> Result<ReportPaths, CoverageError> {
    if records.is_empty() {
        return Err(CoverageError::EmptyRecords);
    }

    fs::create_dir_all(dir)?;

    let summary = dir.join("coverage_summary.txt");
    fs::write(&summary, render_summary(records))?;

    let xml = dir.join("coverage.xml");
    fs::write(&xml, render_xml(records))?;

    let html_dir = dir.join("htmlcov");
    fs::create_dir_all(&html_dir)?;
    let html = html_dir.join("index.html");
    fs::write(&html, render_html(records))?;

    Ok(ReportPaths { summary, xml, html })
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
