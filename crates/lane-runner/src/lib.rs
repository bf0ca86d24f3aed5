//! Standalone test runner for the GPU CI lane.
//!
//! Standalone tests hold exclusive accelerator claims and cannot share a
//! test-runner process. This crate discovers tests by a name-prefix filter,
//! executes each selected test in its own OS process (sequentially, one at
//! a time), and aggregates pass/fail across the isolated subprocesses into
//! a results artifact the host reads back.

mod discover;
mod exec;
mod results;

pub use discover::{discover_tests, DiscoverError, NameFilter, TestCase};
pub use exec::{IsolatedExecutor, RunnerConfig, ENV_ALLOWLIST};
pub use results::{RunnerResults, TestOutcome, TestStatus, RESULTS_SCHEMA_ID, RESULTS_SCHEMA_VERSION};

use std::path::Path;
use thiserror::Error;

/// Errors from a runner invocation
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("discovery error: {0}")]
    Discover(#[from] DiscoverError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Discover and execute every test matching `filter` under `tests_dir`.
///
/// An empty selection is not an error: the suite passes vacuously and the
/// host decides what that means.
pub fn run_suite(
    tests_dir: &Path,
    filter: &NameFilter,
    config: RunnerConfig,
) -> Result<RunnerResults, RunnerError> {
    let cases = discover_tests(tests_dir, filter)?;
    let executor = IsolatedExecutor::new(config);

    let mut outcomes = Vec::with_capacity(cases.len());
    for case in &cases {
        outcomes.push(executor.run_case(case));
    }

    Ok(RunnerResults::from_outcomes(
        filter.prefix().to_string(),
        outcomes,
    ))
}
