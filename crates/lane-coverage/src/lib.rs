//! Coverage reporter engine for the GPU CI lane.
//!
//! Converts the line-execution records produced by a test run into a
//! textual summary, a Cobertura-style XML artifact, and a static HTML
//! artifact, and builds the invocation for the external upload tool.
//! A coverage artifact is keyed by source revision plus job metadata
//! and becomes immutable once uploaded.

mod key;
mod record;
mod report;
mod upload;

pub use key::ReportKey;
pub use record::{CoverageRecords, FileRecord};
pub use report::{render_html, render_summary, render_xml, write_artifacts, ReportPaths};
pub use upload::{UploadOutcome, UploadSpec};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Schema version for coverage_artifact.json
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for coverage_artifact.json
pub const ARTIFACT_SCHEMA_ID: &str = "gpu-ci/coverage_artifact@1";

/// Errors from coverage operations
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("no coverage records present")]
    EmptyRecords,

    #[error("coverage artifact already uploaded (report key {0})")]
    AlreadyUploaded(String),
}

/// Aggregate line-coverage totals for a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageTotals {
    /// Total measurable statements
    pub statements: u64,

    /// Statements never executed
    pub missed: u64,

    /// Covered percentage, 0.0–100.0
    pub percent: f64,
}

/// Coverage artifact metadata (coverage_artifact.json)
///
/// Keyed by source revision plus job metadata; produced once per run and
/// immutable after upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageArtifact {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When the artifact was created
    pub created_at: DateTime<Utc>,

    /// Source revision the coverage was measured against
    pub revision: String,

    /// Flags attached to the upload (e.g. "gpu", "pytest")
    pub flags: Vec<String>,

    /// Named label for the report
    pub name: String,

    /// Environment tags (e.g. "linux", "azure")
    pub env_tags: Vec<String>,

    /// Report key derived from revision + metadata
    pub report_key: String,

    /// Aggregate totals
    pub totals: CoverageTotals,

    /// Whether the artifact has been uploaded
    pub uploaded: bool,
}

impl CoverageArtifact {
    /// Create a new, not-yet-uploaded artifact
    pub fn new(
        revision: String,
        flags: Vec<String>,
        name: String,
        env_tags: Vec<String>,
        totals: CoverageTotals,
    ) -> Result<Self, CoverageError> {
        let report_key = ReportKey::compute(&revision, &flags, &name, &env_tags)?;
        Ok(Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            schema_id: ARTIFACT_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            revision,
            flags,
            name,
            env_tags,
            report_key: report_key.into_hex(),
            totals,
            uploaded: false,
        })
    }

    /// Mark the artifact uploaded. One-way: a second call is an error.
    pub fn mark_uploaded(&mut self) -> Result<(), CoverageError> {
        if self.uploaded {
            return Err(CoverageError::AlreadyUploaded(self.report_key.clone()));
        }
        self.uploaded = true;
        Ok(())
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
    pub fn write_to_file(&self, path: &Path) -> Result<(), CoverageError> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, CoverageError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}
