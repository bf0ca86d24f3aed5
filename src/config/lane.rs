//! Typed lane configuration.
//!
//! The typed view over the merged configuration layers. Every field has a
//! built-in default, so partial TOML files parse cleanly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::budget::RunBudget;
use crate::provision::{DeviceMount, DeviceRequest, WorkspaceClean};

use super::effective::ConfigError;

/// Job-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Overall run timeout in minutes
    pub timeout_minutes: u64,

    /// Cancellation grace window in minutes
    pub cancel_grace_minutes: u64,

    /// Informational pool name
    pub pool: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 20,
            cancel_grace_minutes: 2,
            pool: "gpu-pool".to_string(),
        }
    }
}

impl JobConfig {
    /// The run budget for these settings
    pub fn budget(&self) -> RunBudget {
        RunBudget {
            timeout_minutes: self.timeout_minutes,
            cancel_grace_minutes: self.cancel_grace_minutes,
        }
    }
}

/// Container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Image repository
    pub repository: String,

    /// Base-toolchain identifier
    pub toolchain: String,

    /// Accelerator toolkit version
    pub accelerator_toolkit: String,

    /// Fixed entrypoint executable
    pub entrypoint: PathBuf,

    /// Accelerator request
    pub device_request: DeviceRequest,

    /// Device/socket mounts
    pub mounts: Vec<DeviceMount>,

    /// Workspace directory
    pub workspace: PathBuf,

    /// Workspace cleanup policy
    pub workspace_clean: WorkspaceClean,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            repository: "lane-images/gpu".to_string(),
            toolchain: "py3.9-torch1.11".to_string(),
            accelerator_toolkit: "cuda11.3".to_string(),
            entrypoint: PathBuf::from("/bin/bash"),
            device_request: DeviceRequest::All,
            mounts: Vec::new(),
            workspace: PathBuf::from("/workspace"),
            workspace_clean: WorkspaceClean::All,
        }
    }
}

/// Install settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Python interpreter
    pub python: String,

    /// Pinned requirements file (None to install the project alone)
    pub requirements: Option<PathBuf>,

    /// Extra installer arguments
    pub extra_args: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            requirements: Some(PathBuf::from("requirements/devel.txt")),
            extra_args: Vec::new(),
        }
    }
}

/// Validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateConfig {
    /// Diagnostics argv
    pub diagnostics: Vec<String>,

    /// Device-count probe argv; stdout must end in an integer
    pub probe: Vec<String>,

    /// Minimum accelerator devices required
    pub min_devices: u32,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            diagnostics: vec![
                "python".to_string(),
                "requirements/collect_env_details.py".to_string(),
            ],
            probe: vec![
                "python".to_string(),
                "-c".to_string(),
                "import torch; print(torch.cuda.device_count())".to_string(),
            ],
            min_devices: 2,
        }
    }
}

/// Standalone test stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StandaloneConfig {
    /// Name-prefix filter passed as `-k`
    pub filter: String,

    /// Directory containing the test files
    pub tests_dir: PathBuf,

    /// Runner binary
    pub runner: String,

    /// Per-test timeout in seconds
    pub timeout_seconds: u64,

    /// SIGTERM-to-SIGKILL grace in seconds
    pub grace_seconds: u64,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            filter: "test_fts_multi_".to_string(),
            tests_dir: PathBuf::from("tests"),
            runner: "lane-runner".to_string(),
            timeout_seconds: 300,
            grace_seconds: 30,
        }
    }
}

/// Example smoke-test stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamplesConfig {
    /// Directory containing the example tests
    pub dir: PathBuf,

    /// File pattern for example tests
    pub pattern: String,

    /// Abort after this many failures
    pub maxfail: u32,
}

impl Default for ExamplesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tests"),
            pattern: "test_examples*.py".to_string(),
            maxfail: 1,
        }
    }
}

/// Coverage stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Coverage records file produced by the test run
    pub records: PathBuf,

    /// Upload flags
    pub flags: Vec<String>,

    /// Report label
    pub name: String,

    /// Environment tags
    pub env_tags: Vec<String>,

    /// Upload program
    pub uploader: String,

    /// Whether report/upload failure gates the run
    pub fatal: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            records: PathBuf::from("coverage_records.json"),
            flags: vec!["gpu".to_string(), "pytest".to_string()],
            name: "GPU-coverage".to_string(),
            env_tags: vec!["linux".to_string(), "azure".to_string()],
            uploader: "codecov".to_string(),
            fatal: false,
        }
    }
}

/// Trigger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggersConfig {
    /// Branch patterns
    pub branches: Vec<String>,

    /// Whether all tag refs activate
    pub tags: bool,

    /// Pull-request target patterns
    pub pr_targets: Vec<String>,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            branches: vec!["main".to_string(), "release/*".to_string()],
            tags: true,
            pr_targets: vec!["main".to_string(), "release/*".to_string()],
        }
    }
}

/// Packaging manifest settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Package source directory
    pub package_dir: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            package_dir: "src".to_string(),
        }
    }
}

/// The full typed lane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub job: JobConfig,
    pub container: ContainerConfig,
    pub install: InstallConfig,
    pub validate: ValidateConfig,
    pub standalone: StandaloneConfig,
    pub examples: ExamplesConfig,
    pub coverage: CoverageConfig,
    pub triggers: TriggersConfig,
    pub manifest: ManifestConfig,
}

impl LaneConfig {
    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.job
            .budget()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.validate.min_devices == 0 {
            return Err(ConfigError::Invalid(
                "validate.min_devices must be at least 1".to_string(),
            ));
        }

        if self.standalone.filter.is_empty() {
            return Err(ConfigError::Invalid(
                "standalone.filter must not be empty".to_string(),
            ));
        }

        if self.examples.maxfail == 0 {
            return Err(ConfigError::Invalid(
                "examples.maxfail must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
