//! Configuration merge system.
//!
//! Four layers, lowest to highest precedence:
//! 1. Built-in lane defaults
//! 2. Host config (~/.config/lane/gpu.toml)
//! 3. Repo config (.lane/gpu.toml)
//! 4. CLI overrides

mod defaults;
mod effective;
mod lane;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use lane::{
    ContainerConfig, CoverageConfig, ExamplesConfig, InstallConfig, JobConfig, LaneConfig,
    ManifestConfig, StandaloneConfig, TriggersConfig, ValidateConfig,
};
pub use merge::{deep_merge, merge_layers};

use std::path::PathBuf;

/// Default repo config path
pub const REPO_CONFIG_PATH: &str = ".lane/gpu.toml";

/// Default host config path (under $HOME)
pub const HOST_CONFIG_RELATIVE: &str = ".config/lane/gpu.toml";

/// Resolve the host config path from $HOME
pub fn host_config_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(HOST_CONFIG_RELATIVE))
}
