//! Run summary (run_summary.json).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::failure::{ExitCode, ExitCodeAggregator, Status};
use super::stage_summary::StageSummary;

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "gpu-ci/run_summary@1";

/// Run summary (run_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// Source revision the run validated
    pub revision: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Aggregated status
    pub status: Status,

    /// Aggregated exit code
    pub exit_code: i32,

    /// Total stages in the run
    pub stage_count: usize,

    /// Count of stages with status=success
    pub stages_succeeded: usize,

    /// Count of stages with status=failed
    pub stages_failed: usize,

    /// Count of stages with status=cancelled
    pub stages_cancelled: usize,

    /// Count of stages skipped due to early-abort
    pub stages_skipped: usize,

    /// Wall-clock duration of the entire run in milliseconds
    pub duration_ms: u64,

    /// Human-readable summary
    pub human_summary: String,
}

impl RunSummary {
    /// Create a run summary by aggregating stage summaries.
    ///
    /// Coverage-stage failures are excluded from the aggregate unless
    /// `report_fatal` is set; the stage is still counted in the totals.
    pub fn from_stage_summaries(
        run_id: String,
        revision: String,
        summaries: &[StageSummary],
        duration_ms: u64,
        report_fatal: bool,
    ) -> Self {
        let mut aggregator = ExitCodeAggregator::new();
        let mut stages_succeeded = 0;
        let mut stages_failed = 0;
        let mut stages_cancelled = 0;
        let mut stages_skipped = 0;

        for summary in summaries {
            match summary.status {
                Status::Success => stages_succeeded += 1,
                Status::Failed => stages_failed += 1,
                Status::Cancelled => stages_cancelled += 1,
                Status::Skipped => stages_skipped += 1,
            }

            let non_gating = summary.stage.always_run()
                && summary.status == Status::Failed
                && !report_fatal;
            if non_gating {
                continue;
            }

            let exit_code = summary
                .failure_kind
                .map(|k| k.exit_code())
                .unwrap_or_else(|| summary.status.default_exit_code());
            aggregator.add(summary.status, exit_code);
        }

        let status = aggregator.status();
        let exit_code = aggregator.exit_code();
        let stage_count = summaries.len();

        let human_summary = Self::generate_human_summary(
            status,
            stage_count,
            stages_succeeded,
            stages_failed,
            stages_cancelled,
            stages_skipped,
        );

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            revision,
            created_at: Utc::now(),
            status,
            exit_code: exit_code.as_i32(),
            stage_count,
            stages_succeeded,
            stages_failed,
            stages_cancelled,
            stages_skipped,
            duration_ms,
            human_summary,
        }
    }

    fn generate_human_summary(
        status: Status,
        total: usize,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        skipped: usize,
    ) -> String {
        let mut parts = vec![format!("{} of {} stages succeeded", succeeded, total)];
        if failed > 0 {
            parts.push(format!("{} failed", failed));
        }
        if cancelled > 0 {
            parts.push(format!("{} cancelled", cancelled));
        }
        if skipped > 0 {
            parts.push(format!("{} skipped", skipped));
        }
        format!("{:?}: {}", status, parts.join(", "))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write atomically to the run directory as run_summary.json
    pub fn write_to_run_dir(&self, run_dir: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        let path = run_dir.join("run_summary.json");
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &path)
    }

    /// The aggregated exit code
    pub fn exit(&self) -> ExitCode {
        ExitCode::from_i32(self.exit_code).unwrap_or(ExitCode::Executor)
    }
}
