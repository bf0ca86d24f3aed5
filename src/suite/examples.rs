//! Example smoke-test stage.
//!
//! Runs the example-test files through the main test runner with
//! `-v --maxfail=<n> --durations=0`: the stage aborts on the first failing
//! example, and per-test durations are reported for every test that ran.
//! The duration lines are parsed out of the runner output into an
//! artifact.

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::ExamplesConfig;
use crate::step::StepSpec;

/// Schema version for durations.json
pub const DURATIONS_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for durations.json
pub const DURATIONS_SCHEMA_ID: &str = "gpu-ci/durations@1";

/// Build the example stage invocation.
///
/// The file pattern is a shell glob, so the invocation goes through `sh`.
pub fn examples_step(config: &ExamplesConfig, python: &str) -> StepSpec {
    let command = format!(
        "exec {} -m pytest {} -v --maxfail={} --durations=0",
        python,
        config.dir.join(&config.pattern).display(),
        config.maxfail
    );
    StepSpec::new(
        "example-tests",
        vec!["sh".to_string(), "-c".to_string(), command],
    )
}

/// One parsed duration line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDuration {
    /// Duration in seconds
    pub seconds: f64,

    /// Phase: call, setup, or teardown
    pub phase: String,

    /// Test node id
    pub test_id: String,
}

/// Parse `--durations=0` report lines from runner output.
///
/// Lines look like `1.23s call tests/test_examples.py::test_one`.
pub fn parse_durations(output: &str) -> Vec<TestDuration> {
    let re = Regex::new(r"(?m)^\s*(\d+\.\d+)s\s+(call|setup|teardown)\s+(\S+)\s*$")
        .expect("static regex");

    re.captures_iter(output)
        .filter_map(|caps| {
            let seconds = caps[1].parse::<f64>().ok()?;
            Some(TestDuration {
                seconds,
                phase: caps[2].to_string(),
                test_id: caps[3].to_string(),
            })
        })
        .collect()
}

/// Durations artifact (durations.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationsReport {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When the report was created
    pub created_at: DateTime<Utc>,

    /// Parsed durations, as reported
    pub durations: Vec<TestDuration>,
}

impl DurationsReport {
    /// Build a report from parsed durations
    pub fn new(durations: Vec<TestDuration>) -> Self {
        Self {
            schema_version: DURATIONS_SCHEMA_VERSION,
            schema_id: DURATIONS_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            durations,
        }
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)
    }
}
