//! Failure taxonomy and stable exit codes.

use serde::{Deserialize, Serialize};

/// Stage/run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Completed successfully
    Success,
    /// Failed during execution
    Failed,
    /// Never ran because an earlier fatal failure aborted the run
    Skipped,
    /// Cancelled (signal, cancel marker, or budget exhaustion)
    Cancelled,
}

impl Status {
    /// Get the default exit code for this status
    pub fn default_exit_code(&self) -> ExitCode {
        match self {
            Status::Success => ExitCode::Success,
            Status::Failed => ExitCode::Executor, // Specific failure_kind may override
            Status::Skipped => ExitCode::Success,
            Status::Cancelled => ExitCode::Cancelled,
        }
    }

    /// Check if this is a terminal failure state
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Cancelled)
    }
}

/// Failure kind - categorizes the cause of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Environment provisioning failure (image, device mounts)
    Provision,
    /// Dependency install failure
    Install,
    /// Environment precondition failure (device count)
    Precondition,
    /// Test stage failure
    Test,
    /// Coverage report or upload failure (non-fatal unless configured)
    Report,
    /// Executor failure (process management, artifacts)
    Executor,
    /// Run was cancelled
    Cancelled,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Provision => ExitCode::Provision,
            FailureKind::Install => ExitCode::Install,
            FailureKind::Precondition => ExitCode::Precondition,
            FailureKind::Test => ExitCode::TestFailed,
            FailureKind::Report => ExitCode::ReportFailed,
            FailureKind::Executor => ExitCode::Executor,
            FailureKind::Cancelled => ExitCode::Cancelled,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Provision => "Environment provisioning failed",
            FailureKind::Install => "Dependency install failed",
            FailureKind::Precondition => "Environment precondition failed",
            FailureKind::Test => "Test stage failed",
            FailureKind::Report => "Coverage reporting failed",
            FailureKind::Executor => "Executor error",
            FailureKind::Cancelled => "Run cancelled",
        }
    }
}

/// Failure subkind - optional additional detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureSubkind {
    /// Container image could not be pulled or built
    ImagePull,
    /// Accelerator device mount was refused
    DeviceMount,
    /// Dependency resolution or build failed
    DependencyResolution,
    /// Fewer accelerator devices than required
    InsufficientDevices,
    /// One or more isolated standalone tests failed
    StandaloneAggregate,
    /// Example stage aborted on its first failing test
    FailFast,
    /// Coverage upload failed
    UploadFailed,
    /// Overall run budget exceeded
    TimeoutOverall,
    /// Finalizer grace window exceeded
    GraceExceeded,
}

impl FailureSubkind {
    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureSubkind::ImagePull => "Image pull failed",
            FailureSubkind::DeviceMount => "Device mount refused",
            FailureSubkind::DependencyResolution => "Dependency resolution failed",
            FailureSubkind::InsufficientDevices => "Insufficient accelerator devices",
            FailureSubkind::StandaloneAggregate => "Standalone test aggregate failed",
            FailureSubkind::FailFast => "First failing example aborted the stage",
            FailureSubkind::UploadFailed => "Coverage upload failed",
            FailureSubkind::TimeoutOverall => "Overall timeout exceeded",
            FailureSubkind::GraceExceeded => "Grace window exceeded",
        }
    }
}

/// Stable exit codes for the `gpu-ci` process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful run
    Success = 0,
    /// Configuration error
    Config = 1,
    /// Trigger rules declined the ref (no run)
    NotTriggered = 3,
    /// Provisioning failed
    Provision = 20,
    /// Install failed
    Install = 30,
    /// Precondition failed
    Precondition = 40,
    /// A test stage failed
    TestFailed = 50,
    /// Coverage reporting failed (only surfaces when configured fatal)
    ReportFailed = 60,
    /// Packaging manifest violation
    ManifestViolation = 70,
    /// Run was cancelled or timed out
    Cancelled = 80,
    /// Executor failure
    Executor = 90,
}

impl ExitCode {
    /// Get the integer value of the exit code
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Create from integer value
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Config),
            3 => Some(ExitCode::NotTriggered),
            20 => Some(ExitCode::Provision),
            30 => Some(ExitCode::Install),
            40 => Some(ExitCode::Precondition),
            50 => Some(ExitCode::TestFailed),
            60 => Some(ExitCode::ReportFailed),
            70 => Some(ExitCode::ManifestViolation),
            80 => Some(ExitCode::Cancelled),
            90 => Some(ExitCode::Executor),
            _ => None,
        }
    }

    /// Check if this exit code indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl Default for ExitCode {
    fn default() -> Self {
        ExitCode::Success
    }
}

/// Helper for aggregating exit codes across stages
pub struct ExitCodeAggregator {
    has_cancelled: bool,
    first_failure_code: Option<ExitCode>,
}

impl ExitCodeAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self {
            has_cancelled: false,
            first_failure_code: None,
        }
    }

    /// Add a stage's status and exit code to the aggregation.
    ///
    /// Skipped stages carry no signal of their own.
    pub fn add(&mut self, status: Status, exit_code: ExitCode) {
        match status {
            Status::Cancelled => {
                self.has_cancelled = true;
            }
            Status::Failed => {
                if self.first_failure_code.is_none() {
                    self.first_failure_code = Some(exit_code);
                }
            }
            Status::Success | Status::Skipped => {}
        }
    }

    /// Get the aggregated status
    pub fn status(&self) -> Status {
        if self.has_cancelled {
            Status::Cancelled
        } else if self.first_failure_code.is_some() {
            Status::Failed
        } else {
            Status::Success
        }
    }

    /// Get the aggregated exit code: cancellation dominates, otherwise the
    /// first failure's code wins
    pub fn exit_code(&self) -> ExitCode {
        if self.has_cancelled {
            ExitCode::Cancelled
        } else if let Some(code) = self.first_failure_code {
            code
        } else {
            ExitCode::Success
        }
    }
}

impl Default for ExitCodeAggregator {
    fn default() -> Self {
        Self::new()
    }
}
