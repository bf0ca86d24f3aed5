//! Test stage invocations.
//!
//! Two non-overlapping stages: the standalone multi-device stage runs
//! through the dedicated `lane-runner` binary (one isolated process per
//! test), the example smoke-test stage runs through the main test runner
//! with fail-fast and full duration reporting.

pub mod examples;
pub mod standalone;

pub use examples::{examples_step, parse_durations, DurationsReport, TestDuration};
pub use standalone::{read_results, standalone_step};
