//! Pipeline trigger rules.
//!
//! Decides whether a git ref activates the pipeline. Branch refs activate
//! when the branch name matches any branch pattern; any tag ref activates;
//! pull-request refs activate when the target branch matches any PR-target
//! pattern. Patterns within a list are OR'd; there are no negative rules.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default branch patterns
pub const DEFAULT_BRANCHES: &[&str] = &["main", "release/*"];

/// Default pull-request target patterns
pub const DEFAULT_PR_TARGETS: &[&str] = &["main", "release/*"];

/// Errors from trigger rule construction or ref parsing
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("glob pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("unrecognized ref: {0}")]
    UnrecognizedRef(String),
}

/// A git ref presented to the trigger surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GitRef {
    /// A branch head
    Branch { name: String },
    /// A tag
    Tag { name: String },
    /// A pull request targeting a branch
    PullRequest { target: String },
}

impl GitRef {
    /// Parse a fully-qualified or bare ref.
    ///
    /// `refs/heads/x` → Branch, `refs/tags/x` → Tag, anything else without
    /// a `refs/` prefix is treated as a bare branch name.
    pub fn parse(s: &str) -> Result<Self, TriggerError> {
        if let Some(name) = s.strip_prefix("refs/heads/") {
            return Ok(GitRef::Branch {
                name: name.to_string(),
            });
        }
        if let Some(name) = s.strip_prefix("refs/tags/") {
            return Ok(GitRef::Tag {
                name: name.to_string(),
            });
        }
        if s.starts_with("refs/") {
            return Err(TriggerError::UnrecognizedRef(s.to_string()));
        }
        Ok(GitRef::Branch {
            name: s.to_string(),
        })
    }
}

impl std::fmt::Display for GitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitRef::Branch { name } => write!(f, "refs/heads/{}", name),
            GitRef::Tag { name } => write!(f, "refs/tags/{}", name),
            GitRef::PullRequest { target } => write!(f, "pull-request → {}", target),
        }
    }
}

/// The trigger decision for a ref
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDecision {
    /// Whether the pipeline activates
    pub activated: bool,

    /// The pattern that matched (None when not activated or for tag refs,
    /// which activate unconditionally)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,

    /// Human-readable reason
    pub reason: String,
}

/// Compiled trigger rules
#[derive(Debug)]
pub struct TriggerRules {
    branch_patterns: Vec<String>,
    branch_set: GlobSet,
    /// All tag refs activate when true
    tags: bool,
    pr_target_patterns: Vec<String>,
    pr_target_set: GlobSet,
}

impl TriggerRules {
    /// Build rules from pattern lists
    pub fn new(
        branches: Vec<String>,
        tags: bool,
        pr_targets: Vec<String>,
    ) -> Result<Self, TriggerError> {
        Ok(Self {
            branch_set: compile(&branches)?,
            branch_patterns: branches,
            tags,
            pr_target_set: compile(&pr_targets)?,
            pr_target_patterns: pr_targets,
        })
    }

    /// The default rules: branches `main` and `release/*`, all tag refs,
    /// PR targets `main` and `release/*`
    pub fn defaults() -> Self {
        Self::new(
            DEFAULT_BRANCHES.iter().map(|s| s.to_string()).collect(),
            true,
            DEFAULT_PR_TARGETS.iter().map(|s| s.to_string()).collect(),
        )
        .expect("default patterns are valid globs")
    }

    /// Evaluate a ref against the rules
    pub fn evaluate(&self, git_ref: &GitRef) -> TriggerDecision {
        match git_ref {
            GitRef::Branch { name } => {
                match first_match(&self.branch_set, &self.branch_patterns, name) {
                    Some(pattern) => TriggerDecision {
                        activated: true,
                        matched_pattern: Some(pattern.clone()),
                        reason: format!("branch '{}' matches '{}'", name, pattern),
                    },
                    None => TriggerDecision {
                        activated: false,
                        matched_pattern: None,
                        reason: format!("branch '{}' matches no branch pattern", name),
                    },
                }
            }
            GitRef::Tag { name } => {
                if self.tags {
                    TriggerDecision {
                        activated: true,
                        matched_pattern: None,
                        reason: format!("tag '{}': all tag refs activate", name),
                    }
                } else {
                    TriggerDecision {
                        activated: false,
                        matched_pattern: None,
                        reason: format!("tag '{}': tag triggers disabled", name),
                    }
                }
            }
            GitRef::PullRequest { target } => {
                match first_match(&self.pr_target_set, &self.pr_target_patterns, target) {
                    Some(pattern) => TriggerDecision {
                        activated: true,
                        matched_pattern: Some(pattern.clone()),
                        reason: format!("PR target '{}' matches '{}'", target, pattern),
                    },
                    None => TriggerDecision {
                        activated: false,
                        matched_pattern: None,
                        reason: format!("PR target '{}' matches no target pattern", target),
                    },
                }
            }
        }
    }
}

fn compile(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

fn first_match<'a>(set: &GlobSet, patterns: &'a [String], name: &str) -> Option<&'a String> {
    set.matches(name).first().map(|&i| &patterns[i])
}
