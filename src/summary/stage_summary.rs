//! Per-stage summary entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::{FailureKind, FailureSubkind, Status};

/// Schema version for stage summary entries
pub const STAGE_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for stage summary entries
pub const STAGE_SUMMARY_SCHEMA_ID: &str = "gpu-ci/stage_summary@1";

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Container environment provisioning
    Provision,
    /// Project + requirements install
    Install,
    /// Diagnostics and accelerator precondition check
    Validate,
    /// Process-isolated multi-device tests
    StandaloneTests,
    /// Fail-fast example smoke tests
    ExampleTests,
    /// Coverage rendering and upload
    Coverage,
}

impl Stage {
    /// All stages in execution order
    pub const ORDER: [Stage; 6] = [
        Stage::Provision,
        Stage::Install,
        Stage::Validate,
        Stage::StandaloneTests,
        Stage::ExampleTests,
        Stage::Coverage,
    ];

    /// The failure kind a fatal failure in this stage maps to
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Stage::Provision => FailureKind::Provision,
            Stage::Install => FailureKind::Install,
            Stage::Validate => FailureKind::Precondition,
            Stage::StandaloneTests | Stage::ExampleTests => FailureKind::Test,
            Stage::Coverage => FailureKind::Report,
        }
    }

    /// Whether the stage runs even after an earlier fatal failure
    pub fn always_run(&self) -> bool {
        matches!(self, Stage::Coverage)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Provision => "provision",
            Stage::Install => "install",
            Stage::Validate => "validate",
            Stage::StandaloneTests => "standalone-tests",
            Stage::ExampleTests => "example-tests",
            Stage::Coverage => "coverage",
        };
        f.write_str(name)
    }
}

/// Summary of one executed (or skipped) stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// Which stage this summarizes
    pub stage: Stage,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Terminal status
    pub status: Status,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// Failure kind (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// Failure subkind (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_subkind: Option<FailureSubkind>,

    /// Human-readable summary line
    pub human_summary: String,
}

impl StageSummary {
    /// A successful stage
    pub fn success(run_id: String, stage: Stage, duration_ms: u64) -> Self {
        Self {
            schema_version: STAGE_SUMMARY_SCHEMA_VERSION,
            schema_id: STAGE_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            stage,
            created_at: Utc::now(),
            status: Status::Success,
            duration_ms,
            failure_kind: None,
            failure_subkind: None,
            human_summary: format!("{} succeeded", stage),
        }
    }

    /// A failed stage
    pub fn failure(
        run_id: String,
        stage: Stage,
        subkind: Option<FailureSubkind>,
        detail: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            schema_version: STAGE_SUMMARY_SCHEMA_VERSION,
            schema_id: STAGE_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            stage,
            created_at: Utc::now(),
            status: Status::Failed,
            duration_ms,
            failure_kind: Some(stage.failure_kind()),
            failure_subkind: subkind,
            human_summary: detail,
        }
    }

    /// A stage skipped because of an earlier fatal failure
    pub fn skipped(run_id: String, stage: Stage) -> Self {
        Self {
            schema_version: STAGE_SUMMARY_SCHEMA_VERSION,
            schema_id: STAGE_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            stage,
            created_at: Utc::now(),
            status: Status::Skipped,
            duration_ms: 0,
            failure_kind: None,
            failure_subkind: None,
            human_summary: format!("{} skipped after earlier failure", stage),
        }
    }

    /// A cancelled stage
    pub fn cancelled(run_id: String, stage: Stage, duration_ms: u64) -> Self {
        Self {
            schema_version: STAGE_SUMMARY_SCHEMA_VERSION,
            schema_id: STAGE_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            stage,
            created_at: Utc::now(),
            status: Status::Cancelled,
            duration_ms,
            failure_kind: Some(FailureKind::Cancelled),
            failure_subkind: None,
            human_summary: format!("{} cancelled", stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::failure::ExitCode;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::ORDER[0], Stage::Provision);
        assert_eq!(Stage::ORDER[5], Stage::Coverage);
        assert_eq!(Stage::ORDER.len(), 6);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::StandaloneTests.to_string(), "standalone-tests");
        assert_eq!(Stage::Coverage.to_string(), "coverage");
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_string(&Stage::ExampleTests).unwrap(),
            r#""example-tests""#
        );
    }

    #[test]
    fn test_only_coverage_is_always_run() {
        for stage in Stage::ORDER {
            assert_eq!(stage.always_run(), stage == Stage::Coverage);
        }
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(Stage::Validate.failure_kind(), FailureKind::Precondition);
        assert_eq!(Stage::StandaloneTests.failure_kind(), FailureKind::Test);
        assert_eq!(Stage::Coverage.failure_kind(), FailureKind::Report);
        assert_eq!(
            Stage::Validate.failure_kind().exit_code(),
            ExitCode::Precondition
        );
    }

    #[test]
    fn test_failure_summary_carries_subkind() {
        let summary = StageSummary::failure(
            "run-1".to_string(),
            Stage::Validate,
            Some(FailureSubkind::InsufficientDevices),
            "1 device available, 2 required".to_string(),
            10,
        );

        assert_eq!(summary.status, Status::Failed);
        assert_eq!(summary.failure_kind, Some(FailureKind::Precondition));
        assert_eq!(
            summary.failure_subkind,
            Some(FailureSubkind::InsufficientDevices)
        );
    }

    #[test]
    fn test_skipped_summary() {
        let summary = StageSummary::skipped("run-1".to_string(), Stage::ExampleTests);
        assert_eq!(summary.status, Status::Skipped);
        assert_eq!(summary.duration_ms, 0);
        assert!(summary.failure_kind.is_none());
    }
}
