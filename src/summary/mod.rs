//! Run and stage summaries with the failure taxonomy and stable exit codes.

mod failure;
mod run_summary;
mod stage_summary;

pub use failure::{ExitCode, ExitCodeAggregator, FailureKind, FailureSubkind, Status};
pub use run_summary::{RunSummary, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION};
pub use stage_summary::{Stage, StageSummary, STAGE_SUMMARY_SCHEMA_ID, STAGE_SUMMARY_SCHEMA_VERSION};
