//! Upload invocation builder.
//!
//! The lane does not talk to the metrics aggregator itself; it shells out
//! to the external upload tool. This module builds that invocation and
//! models its non-fatal outcome semantics.

use serde::{Deserialize, Serialize};

/// Specification for the external upload invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSpec {
    /// Upload program (e.g. "codecov")
    pub program: String,

    /// Source revision (`--commit`)
    pub commit: String,

    /// Flags (`--flags`, comma-joined)
    pub flags: Vec<String>,

    /// Report label (`--name`)
    pub name: String,

    /// Environment tags (`--env`, comma-joined)
    pub env_tags: Vec<String>,
}

impl UploadSpec {
    /// Build the full argv for the upload invocation
    pub fn argv(&self) -> Vec<String> {
        vec![
            self.program.clone(),
            "--commit".to_string(),
            self.commit.clone(),
            "--flags".to_string(),
            self.flags.join(","),
            "--name".to_string(),
            self.name.clone(),
            "--env".to_string(),
            self.env_tags.join(","),
        ]
    }

    /// Render the invocation as a display string
    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }
}

/// Outcome of an upload attempt.
///
/// Upload failure never gates the run by itself; the caller records the
/// outcome and moves on unless it was configured otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Exit code of the upload process (None if it never started)
    pub exit_code: Option<i32>,

    /// Whether the upload succeeded
    pub succeeded: bool,

    /// Failure detail when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadOutcome {
    /// A successful upload
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            succeeded: true,
            error: None,
        }
    }

    /// A failed upload with the process exit code
    pub fn failed(exit_code: Option<i32>, error: String) -> Self {
        Self {
            exit_code,
            succeeded: false,
            error: Some(error),
        }
    }
}
