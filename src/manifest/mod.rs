//! Packaging manifest rules for the source distribution.
//!
//! Declares which files belong in the built distribution: package source
//! and example `.py` files plus the `py.typed` type-marker are included;
//! everything under `tests/` and `docs/` is excluded.

mod rules;

pub use rules::{ManifestRule, RuleAction, RuleError, RuleSet};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors for manifest evaluation
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("root directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A manifest violation found by `check`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestViolation {
    /// Offending relative path
    pub path: String,

    /// What is wrong with it
    pub reason: String,
}

/// The distribution manifest
#[derive(Debug)]
pub struct DistManifest {
    rule_set: RuleSet,
}

impl DistManifest {
    /// Build a manifest from explicit rules
    pub fn new(rules: &[ManifestRule]) -> Result<Self, ManifestError> {
        Ok(Self {
            rule_set: RuleSet::compile(rules)?,
        })
    }

    /// The default rules for a package rooted at `package_dir`
    pub fn default_rules(package_dir: &str) -> Vec<ManifestRule> {
        vec![
            ManifestRule::include(format!("{}/**/*.py", package_dir)),
            ManifestRule::include("examples/**/*.py"),
            ManifestRule::include(format!("{}/py.typed", package_dir)),
            ManifestRule::exclude("tests/**"),
            ManifestRule::exclude("docs/**"),
        ]
    }

    /// A manifest with the default rules
    pub fn with_defaults(package_dir: &str) -> Result<Self, ManifestError> {
        Self::new(&Self::default_rules(package_dir))
    }

    /// Decide whether a single relative path belongs in the distribution
    pub fn decide(&self, path: &Path) -> bool {
        self.rule_set.decide(path)
    }

    /// Select the distribution file set from a source tree.
    ///
    /// Paths are returned relative to `root`, in deterministic order.
    pub fn select(&self, root: &Path) -> Result<Vec<PathBuf>, ManifestError> {
        if !root.is_dir() {
            return Err(ManifestError::RootNotFound(root.to_path_buf()));
        }

        let mut selected = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            if self.decide(&relative) {
                selected.push(relative);
            }
        }
        selected.sort();
        Ok(selected)
    }

    /// Check a source tree for violations of the packaging invariants:
    /// nothing under `tests/` or `docs/` may be selected, and the
    /// type-marker must be present in the selection when it exists on disk.
    pub fn check(&self, root: &Path, package_dir: &str) -> Result<Vec<ManifestViolation>, ManifestError> {
        let selected = self.select(root)?;
        let mut violations = Vec::new();

        for path in &selected {
            if path.starts_with("tests") || path.starts_with("docs") {
                violations.push(ManifestViolation {
                    path: path.display().to_string(),
                    reason: "excluded directory leaked into the distribution".to_string(),
                });
            }
        }

        let marker = PathBuf::from(package_dir).join("py.typed");
        if root.join(&marker).is_file() && !selected.contains(&marker) {
            violations.push(ManifestViolation {
                path: marker.display().to_string(),
                reason: "type-marker file missing from the distribution".to_string(),
            });
        }

        Ok(violations)
    }
}
