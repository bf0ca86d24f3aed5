//! Built-in lane defaults (layer 1).

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Overall run timeout in minutes (default: 20)
    pub timeout_minutes: u64,

    /// Cancellation grace window in minutes (default: 2)
    pub cancel_grace_minutes: u64,

    /// Accelerator devices required by the validator (default: 2)
    pub min_devices: u32,

    /// Standalone test name filter (default: "test_fts_multi_")
    pub standalone_filter: String,

    /// Example stage maxfail (default: 1)
    pub examples_maxfail: u32,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            timeout_minutes: 20,
            cancel_grace_minutes: 2,
            min_devices: 2,
            standalone_filter: "test_fts_multi_".to_string(),
            examples_maxfail: 1,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to the full nested JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "job": {
                "timeout_minutes": self.timeout_minutes,
                "cancel_grace_minutes": self.cancel_grace_minutes,
                "pool": "gpu-pool"
            },
            "container": {
                "repository": "lane-images/gpu",
                "toolchain": "py3.9-torch1.11",
                "accelerator_toolkit": "cuda11.3",
                "entrypoint": "/bin/bash",
                "device_request": "all",
                "mounts": [],
                "workspace": "/workspace",
                "workspace_clean": "all"
            },
            "install": {
                "python": "python",
                "requirements": "requirements/devel.txt",
                "extra_args": []
            },
            "validate": {
                "diagnostics": ["python", "requirements/collect_env_details.py"],
                "probe": ["python", "-c", "import torch; print(torch.cuda.device_count())"],
                "min_devices": self.min_devices
            },
            "standalone": {
                "filter": self.standalone_filter,
                "tests_dir": "tests",
                "runner": "lane-runner",
                "timeout_seconds": 300,
                "grace_seconds": 30
            },
            "examples": {
                "dir": "tests",
                "pattern": "test_examples*.py",
                "maxfail": self.examples_maxfail
            },
            "coverage": {
                "records": "coverage_records.json",
                "flags": ["gpu", "pytest"],
                "name": "GPU-coverage",
                "env_tags": ["linux", "azure"],
                "uploader": "codecov",
                "fatal": false
            },
            "triggers": {
                "branches": ["main", "release/*"],
                "tags": true,
                "pr_targets": ["main", "release/*"]
            },
            "manifest": {
                "package_dir": "src"
            }
        })
    }
}
