//! Environment provisioning.
//!
//! Builds the container-run invocation for a pinned GPU image: repository
//! plus base-toolchain and accelerator-toolkit pins form the image
//! reference, host accelerator devices and sockets are mounted in, and a
//! fixed entrypoint is invoked with no arguments. Provisioning failure is
//! fatal to the run; no retry.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::step::{StepOutcome, StepSpec};
use crate::summary::FailureSubkind;

/// Errors for provisioning configuration
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid device request: {0}")]
    InvalidDeviceRequest(String),

    #[error("invalid mount (expected host:container): {0}")]
    InvalidMount(String),
}

/// Accelerator device request for the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceRequest {
    /// Expose all host accelerators (`--gpus all`)
    All,
    /// Expose a fixed number of accelerators
    Count(u32),
    /// No accelerators
    None,
}

impl TryFrom<String> for DeviceRequest {
    type Error = ProvisionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "all" => Ok(DeviceRequest::All),
            "none" => Ok(DeviceRequest::None),
            other => other
                .parse::<u32>()
                .map(DeviceRequest::Count)
                .map_err(|_| ProvisionError::InvalidDeviceRequest(s)),
        }
    }
}

impl From<DeviceRequest> for String {
    fn from(request: DeviceRequest) -> Self {
        match request {
            DeviceRequest::All => "all".to_string(),
            DeviceRequest::None => "none".to_string(),
            DeviceRequest::Count(n) => n.to_string(),
        }
    }
}

/// Workspace cleanup policy applied when the run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceClean {
    /// Remove the whole workspace
    All,
    /// Remove only the outputs directory
    Outputs,
    /// Leave the workspace in place
    None,
}

/// A host-path to container-path mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceMount {
    /// Host path
    pub host: String,

    /// Container path
    pub container: String,
}

impl TryFrom<String> for DeviceMount {
    type Error = ProvisionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.split_once(':') {
            Some((host, container)) if !host.is_empty() && !container.is_empty() => Ok(Self {
                host: host.to_string(),
                container: container.to_string(),
            }),
            _ => Err(ProvisionError::InvalidMount(s)),
        }
    }
}

impl From<DeviceMount> for String {
    fn from(mount: DeviceMount) -> Self {
        format!("{}:{}", mount.host, mount.container)
    }
}

/// Image coordinates: the pins that version the container image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCoordinates {
    /// Image repository
    pub repository: String,

    /// Base-toolchain identifier (language runtime + framework pins)
    pub toolchain: String,

    /// Accelerator toolkit version
    pub accelerator_toolkit: String,
}

impl ImageCoordinates {
    /// The image tag derived from the pins
    pub fn tag(&self) -> String {
        format!("{}-{}", self.toolchain, self.accelerator_toolkit)
    }

    /// The full image reference
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag())
    }
}

/// Full container specification for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image coordinates
    pub image: ImageCoordinates,

    /// Fixed entrypoint executable, invoked with no arguments
    pub entrypoint: PathBuf,

    /// Accelerator request
    pub device_request: DeviceRequest,

    /// Device/socket mounts
    pub mounts: Vec<DeviceMount>,

    /// Workspace directory inside the job
    pub workspace: PathBuf,

    /// Cleanup policy for the workspace
    pub workspace_clean: WorkspaceClean,
}

impl ContainerSpec {
    /// Build the container-run argv for the given runtime
    pub fn run_argv(&self, runtime: &str) -> Vec<String> {
        let mut argv = vec![runtime.to_string(), "run".to_string(), "--rm".to_string()];

        match self.device_request {
            DeviceRequest::All => {
                argv.push("--gpus".to_string());
                argv.push("all".to_string());
            }
            DeviceRequest::Count(n) => {
                argv.push("--gpus".to_string());
                argv.push(n.to_string());
            }
            DeviceRequest::None => {}
        }

        for mount in &self.mounts {
            argv.push("-v".to_string());
            argv.push(format!("{}:{}", mount.host, mount.container));
        }

        argv.push(self.image.reference());
        argv.push(self.entrypoint.display().to_string());
        argv
    }
}

/// Builds provisioning and cleanup steps
#[derive(Debug, Clone)]
pub struct Provisioner {
    runtime: String,
}

impl Provisioner {
    /// Create a provisioner for the given container runtime
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    /// The provisioning step for a container spec
    pub fn provision_step(&self, spec: &ContainerSpec) -> StepSpec {
        StepSpec::new("provision", spec.run_argv(&self.runtime))
    }

    /// The workspace cleanup finalizer, per policy. None means nothing to
    /// clean.
    pub fn cleanup_step(policy: WorkspaceClean, workspace: &Path) -> Option<StepSpec> {
        let target = match policy {
            WorkspaceClean::All => workspace.to_path_buf(),
            WorkspaceClean::Outputs => workspace.join("outputs"),
            WorkspaceClean::None => return None,
        };

        Some(
            StepSpec::new(
                "workspace-clean",
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!(
                        "rm -rf -- '{0}' && mkdir -p -- '{0}'",
                        target.display()
                    ),
                ],
            )
            .always_run()
            .non_fatal(),
        )
    }

    /// Classify a failed provisioning step from its stderr
    pub fn classify_failure(outcome: &StepOutcome) -> Option<FailureSubkind> {
        let stderr = outcome.stderr.to_lowercase();
        if stderr.contains("pull") || stderr.contains("manifest") || stderr.contains("no such image")
        {
            Some(FailureSubkind::ImagePull)
        } else if stderr.contains("gpu") || stderr.contains("device") || stderr.contains("mount") {
            Some(FailureSubkind::DeviceMount)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepStatus;

    fn sample_spec() -> ContainerSpec {
        ContainerSpec {
            image: ImageCoordinates {
                repository: "lane-images/gpu".to_string(),
                toolchain: "py3.9-torch1.11".to_string(),
                accelerator_toolkit: "cuda11.3".to_string(),
            },
            entrypoint: PathBuf::from("/bin/bash"),
            device_request: DeviceRequest::All,
            mounts: vec![DeviceMount {
                host: "/var/run/devkit.sock".to_string(),
                container: "/var/run/devkit.sock".to_string(),
            }],
            workspace: PathBuf::from("/workspace"),
            workspace_clean: WorkspaceClean::All,
        }
    }

    #[test]
    fn test_image_reference() {
        let spec = sample_spec();
        assert_eq!(spec.image.tag(), "py3.9-torch1.11-cuda11.3");
        assert_eq!(
            spec.image.reference(),
            "lane-images/gpu:py3.9-torch1.11-cuda11.3"
        );
    }

    #[test]
    fn test_run_argv_shape() {
        let argv = sample_spec().run_argv("docker");
        assert_eq!(argv[0], "docker");
        assert_eq!(argv[1], "run");
        assert!(argv.contains(&"--gpus".to_string()));
        assert!(argv.contains(&"all".to_string()));
        assert!(argv.contains(&"-v".to_string()));
        assert!(argv.contains(&"/var/run/devkit.sock:/var/run/devkit.sock".to_string()));
        // Entrypoint is last and carries no arguments
        assert_eq!(argv.last().unwrap(), "/bin/bash");
        let image_pos = argv
            .iter()
            .position(|a| a == "lane-images/gpu:py3.9-torch1.11-cuda11.3")
            .unwrap();
        assert_eq!(image_pos, argv.len() - 2);
    }

    #[test]
    fn test_no_device_request() {
        let mut spec = sample_spec();
        spec.device_request = DeviceRequest::None;
        let argv = spec.run_argv("docker");
        assert!(!argv.contains(&"--gpus".to_string()));
    }

    #[test]
    fn test_device_count_request() {
        let mut spec = sample_spec();
        spec.device_request = DeviceRequest::Count(2);
        let argv = spec.run_argv("docker");
        let pos = argv.iter().position(|a| a == "--gpus").unwrap();
        assert_eq!(argv[pos + 1], "2");
    }

    #[test]
    fn test_device_request_parsing() {
        assert_eq!(
            DeviceRequest::try_from("all".to_string()).unwrap(),
            DeviceRequest::All
        );
        assert_eq!(
            DeviceRequest::try_from("2".to_string()).unwrap(),
            DeviceRequest::Count(2)
        );
        assert!(DeviceRequest::try_from("some".to_string()).is_err());
    }

    #[test]
    fn test_mount_parsing() {
        let mount = DeviceMount::try_from("/a:/b".to_string()).unwrap();
        assert_eq!(mount.host, "/a");
        assert_eq!(mount.container, "/b");
        assert!(DeviceMount::try_from("nocolon".to_string()).is_err());
        assert!(DeviceMount::try_from(":/b".to_string()).is_err());
    }

    #[test]
    fn test_cleanup_step_policies() {
        let ws = Path::new("/workspace");
        let all = Provisioner::cleanup_step(WorkspaceClean::All, ws).unwrap();
        assert!(all.always_run);
        assert!(!all.fatal);
        assert!(all.argv[2].contains("/workspace"));

        let outputs = Provisioner::cleanup_step(WorkspaceClean::Outputs, ws).unwrap();
        assert!(outputs.argv[2].contains("/workspace/outputs"));

        assert!(Provisioner::cleanup_step(WorkspaceClean::None, ws).is_none());
    }

    #[test]
    fn test_classify_failure() {
        let outcome = |stderr: &str| StepOutcome {
            invocation_id: "i".to_string(),
            name: "provision".to_string(),
            status: StepStatus::Failed,
            exit_code: Some(125),
            stdout: String::new(),
            stderr: stderr.to_string(),
            duration_ms: 1,
        };

        assert_eq!(
            Provisioner::classify_failure(&outcome("Error response: pull access denied")),
            Some(FailureSubkind::ImagePull)
        );
        assert_eq!(
            Provisioner::classify_failure(&outcome("could not select device driver with gpu")),
            Some(FailureSubkind::DeviceMount)
        );
        assert_eq!(Provisioner::classify_failure(&outcome("odd failure")), None);
    }
}
