//! Ordered include/exclude rules.
//!
//! Rules are evaluated in order against a relative path; the last matching
//! rule decides. A path matched by no rule is excluded.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors for rule construction
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("glob pattern error: {0}")]
    Glob(#[from] globset::Error),
}

/// What a matching rule does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Include,
    Exclude,
}

/// One ordered rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRule {
    /// Include or exclude
    pub action: RuleAction,

    /// Glob pattern over bundle-relative paths
    pub pattern: String,
}

impl ManifestRule {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Include,
            pattern: pattern.into(),
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Exclude,
            pattern: pattern.into(),
        }
    }
}

/// A compiled, ordered rule set
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<(ManifestRule, GlobMatcher)>,
}

impl RuleSet {
    /// Compile rules, preserving order
    pub fn compile(rules: &[ManifestRule]) -> Result<Self, RuleError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let matcher = Glob::new(&rule.pattern)?.compile_matcher();
            compiled.push((rule.clone(), matcher));
        }
        Ok(Self { rules: compiled })
    }

    /// Decide whether a relative path is included. Last matching rule wins;
    /// unmatched paths are excluded.
    pub fn decide(&self, path: &Path) -> bool {
        let mut included = false;
        for (rule, matcher) in &self.rules {
            if matcher.is_match(path) {
                included = rule.action == RuleAction::Include;
            }
        }
        included
    }

    /// The rules, in order
    pub fn rules(&self) -> impl Iterator<Item = &ManifestRule> {
        self.rules.iter().map(|(rule, _)| rule)
    }
}
