//! Test discovery by name filter.
//!
//! Walks the tests directory for Python test files and scans them for
//! top-level test functions whose name matches the prefix filter. The
//! selection is exact: a test is selected iff its function name starts
//! with the filter prefix.

use regex_lite::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors from test discovery
#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("tests directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Name-prefix filter (the `-k` argument)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    prefix: String,
}

impl NameFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The raw prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix-match semantics: the name must start with the filter
    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }
}

/// A selected test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Path of the test file, relative to the tests directory's parent
    pub file: PathBuf,

    /// Test function name
    pub name: String,
}

impl TestCase {
    /// pytest node id: `<file>::<name>`
    pub fn node_id(&self) -> String {
        format!("{}::{}", self.file.display(), self.name)
    }
}

/// Discover test functions matching `filter` under `tests_dir`.
///
/// Only top-level `def test_*` functions are considered; tests are
/// returned in deterministic (path, then name) order.
pub fn discover_tests(tests_dir: &Path, filter: &NameFilter) -> Result<Vec<TestCase>, DiscoverError> {
    if !tests_dir.is_dir() {
        return Err(DiscoverError::DirNotFound(tests_dir.to_path_buf()));
    }

    // Top-level function definitions only; indented defs belong to classes
    // or closures and are not standalone entry points.
    let def_re = Regex::new(r"(?m)^def\s+(test_\w+)\s*\(").expect("static regex");

    let mut cases = Vec::new();

    let mut files: Vec<PathBuf> = WalkDir::new(tests_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
        .collect();
    files.sort();

    for file in files {
        let contents = fs::read_to_string(&file).map_err(|source| DiscoverError::Io {
            path: file.clone(),
            source,
        })?;

        let mut names: Vec<String> = def_re
            .captures_iter(&contents)
            .map(|c| c[1].to_string())
            .filter(|name| filter.matches(name))
            .collect();
        names.sort();

        for name in names {
            cases.push(TestCase {
                file: file.clone(),
                name,
            });
        }
    }

    Ok(cases)
}
