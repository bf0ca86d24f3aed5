//! Results aggregation (runner_results.json).
//!
//! The runner owns pass/fail aggregation across its isolated subprocesses;
//! the host reads the results artifact back and only decides what the
//! aggregate means for the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::discover::TestCase;

/// Schema version for runner_results.json
pub const RESULTS_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for runner_results.json
pub const RESULTS_SCHEMA_ID: &str = "gpu-ci/runner_results@1";

/// Terminal status of one isolated test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Passed,
    Failed,
    TimedOut,
    Cancelled,
    Error,
}

impl TestStatus {
    /// Whether this status counts as a pass
    pub fn is_pass(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

/// Outcome of one isolated test process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test function name
    pub name: String,

    /// Test file path
    pub file: String,

    /// Terminal status
    pub status: TestStatus,

    /// Process exit code (None when killed or never started)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// Failure detail when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TestOutcome {
    /// Outcome for a test that was never started
    pub fn not_run(case: &TestCase, status: TestStatus) -> Self {
        Self {
            name: case.name.clone(),
            file: case.file.display().to_string(),
            status,
            exit_code: None,
            duration_ms: 0,
            detail: None,
        }
    }
}

/// Aggregated results for a runner invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerResults {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When the results were written
    pub created_at: DateTime<Utc>,

    /// The name filter the selection used
    pub filter: String,

    /// Total selected tests
    pub total: usize,

    /// Tests that passed
    pub passed: usize,

    /// Tests that did not pass (failed, timed out, cancelled, errored)
    pub failed: usize,

    /// Per-test outcomes
    pub outcomes: Vec<TestOutcome>,
}

impl RunnerResults {
    /// Aggregate per-test outcomes
    pub fn from_outcomes(filter: String, outcomes: Vec<TestOutcome>) -> Self {
        let total = outcomes.len();
        let passed = outcomes.iter().filter(|o| o.status.is_pass()).count();
        Self {
            schema_version: RESULTS_SCHEMA_VERSION,
            schema_id: RESULTS_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            filter,
            total,
            passed,
            failed: total - passed,
            outcomes,
        }
    }

    /// True when every selected test passed (vacuously true for an empty
    /// selection)
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}
