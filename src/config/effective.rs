//! Effective configuration with full provenance.
//!
//! The effective config captures the merged layers plus where each layer
//! came from: origin, file path, and a SHA-256 digest of the raw bytes.
//! Secret-bearing keys are redacted before the config is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::lane::LaneConfig;
use super::merge::merge_layers;

/// Schema version for effective_config.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "gpu-ci/effective_config@1";

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "private_key",
    "api_key",
    "credential",
];

/// Errors for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error in {path}: {message}")]
    TomlParse { path: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Origin of a configuration source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Repo,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Origin of this source
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// Run ID (set once a run is created)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,
}

impl EffectiveConfig {
    /// Build the effective config from the four layers
    pub fn build(
        host_config_path: Option<&Path>,
        repo_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        // Layer 1: built-in defaults
        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        // Layer 2: host config
        if let Some(path) = host_config_path {
            if path.exists() {
                let (value, digest) = load_toml_file(path)?;
                layers.push(value);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::Host,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                });
            }
        }

        // Layer 3: repo config
        if let Some(path) = repo_config_path {
            if path.exists() {
                let (value, digest) = load_toml_file(path)?;
                layers.push(value);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::Repo,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                });
            }
        }

        // Layer 4: CLI overrides
        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut merged = merge_layers(layers);
        let redactions = redact_secrets(&mut merged, "");

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            run_id: None,
            config: merged,
            sources,
            redactions,
        })
    }

    /// Parse the merged value into the typed config and validate it
    pub fn typed(&self) -> Result<LaneConfig, ConfigError> {
        let config: LaneConfig = serde_json::from_value(self.config.clone())?;
        config.validate()?;
        Ok(config)
    }

    /// Attach the run ID
    pub fn with_run_id(mut self, run_id: String) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write atomically to the run directory as effective_config.json
    pub fn write_to_run_dir(&self, run_dir: &Path) -> Result<(), ConfigError> {
        let json = self.to_json()?;
        let path = run_dir.join("effective_config.json");
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

/// Load and parse a TOML file, returning the JSON value and raw digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let raw = fs::read(path)?;

    let mut hasher = Sha256::new();
    hasher.update(&raw);
    let digest = hex::encode(hasher.finalize());

    let text = String::from_utf8_lossy(&raw);
    let toml_value: toml::Value = toml::from_str(&text).map_err(|e| ConfigError::TomlParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    Ok((serde_json::to_value(toml_value)?, digest))
}

/// Replace secret-bearing values with "[REDACTED]", returning the key
/// paths that were redacted
fn redact_secrets(value: &mut Value, prefix: &str) -> Vec<String> {
    let mut redacted = Vec::new();

    if let Value::Object(map) = value {
        for (key, child) in map.iter_mut() {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };

            let is_secret = SECRET_KEYS
                .iter()
                .any(|secret| key.to_lowercase().contains(secret));

            if is_secret {
                *child = Value::String("[REDACTED]".to_string());
                redacted.push(path);
            } else {
                redacted.extend(redact_secrets(child, &path));
            }
        }
    }

    redacted
}
