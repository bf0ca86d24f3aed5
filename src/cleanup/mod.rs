//! Always-run finalizers.
//!
//! Stages register command finalizers (workspace cleanup, cache release)
//! that must execute regardless of how the run ended. Finalizers run in
//! reverse registration order inside the cancellation grace window: a
//! finalizer only starts while grace budget remains, and each runs under
//! the remaining-grace deadline. Finalizers that cannot start, or are
//! killed by the deadline, are recorded as GRACE_EXCEEDED.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::step::{StepRunner, StepSpec, StepStatus};

/// How a finalizer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalizerStatus {
    /// Finalizer ran and exited zero
    Succeeded,
    /// Finalizer ran and exited non-zero
    Failed,
    /// Finalizer never started or was killed when the grace window closed
    GraceExceeded,
}

/// Outcome of one finalizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizerOutcome {
    /// Finalizer name
    pub name: String,

    /// Terminal status
    pub status: FinalizerStatus,

    /// Process exit code when it ran to completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Registry of always-run cleanup commands
#[derive(Default)]
pub struct FinalizerRegistry {
    finalizers: Vec<StepSpec>,
}

impl FinalizerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finalizer command
    pub fn register(&mut self, spec: StepSpec) {
        self.finalizers.push(spec);
    }

    /// Number of registered finalizers
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    /// Run all finalizers in reverse registration order under the grace
    /// deadline. Finalizer failures never abort the remaining finalizers.
    pub fn run_all(self, runner: &StepRunner, grace_deadline: Instant) -> Vec<FinalizerOutcome> {
        let mut outcomes = Vec::with_capacity(self.finalizers.len());

        for spec in self.finalizers.into_iter().rev() {
            if Instant::now() >= grace_deadline {
                outcomes.push(FinalizerOutcome {
                    name: spec.name.clone(),
                    status: FinalizerStatus::GraceExceeded,
                    exit_code: None,
                    duration_ms: 0,
                });
                continue;
            }

            // Finalizers ignore cancellation: they are the cancellation
            // path. Only the grace deadline bounds them.
            match runner.run(&spec, Some(grace_deadline), &|| false) {
                Ok(outcome) => {
                    let status = match outcome.status {
                        StepStatus::Succeeded => FinalizerStatus::Succeeded,
                        StepStatus::TimedOut => FinalizerStatus::GraceExceeded,
                        StepStatus::Failed | StepStatus::Cancelled => FinalizerStatus::Failed,
                    };
                    outcomes.push(FinalizerOutcome {
                        name: outcome.name,
                        status,
                        exit_code: outcome.exit_code,
                        duration_ms: outcome.duration_ms,
                    });
                }
                Err(_) => {
                    outcomes.push(FinalizerOutcome {
                        name: spec.name.clone(),
                        status: FinalizerStatus::Failed,
                        exit_code: None,
                        duration_ms: 0,
                    });
                }
            }
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(name: &str, script: &str) -> StepSpec {
        StepSpec::new(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        )
        .always_run()
    }

    #[test]
    fn test_runs_in_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order.log");
        let log_str = log.display();

        let mut registry = FinalizerRegistry::new();
        registry.register(sh("first", &format!("echo first >> {}", log_str)));
        registry.register(sh("second", &format!("echo second >> {}", log_str)));

        let runner = StepRunner::new(false);
        let outcomes = registry.run_all(&runner, Instant::now() + Duration::from_secs(30));

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "second");
        assert_eq!(outcomes[1].name, "first");

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "second\nfirst\n");
    }

    #[test]
    fn test_failure_does_not_stop_remaining() {
        let mut registry = FinalizerRegistry::new();
        registry.register(sh("ok", "exit 0"));
        registry.register(sh("bad", "exit 1"));

        let runner = StepRunner::new(false);
        let outcomes = registry.run_all(&runner, Instant::now() + Duration::from_secs(30));

        assert_eq!(outcomes[0].status, FinalizerStatus::Failed);
        assert_eq!(outcomes[1].status, FinalizerStatus::Succeeded);
    }

    #[test]
    fn test_expired_grace_skips_start() {
        let mut registry = FinalizerRegistry::new();
        registry.register(sh("late", "exit 0"));

        let runner = StepRunner::new(false);
        let outcomes = registry.run_all(&runner, Instant::now() - Duration::from_secs(1));

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, FinalizerStatus::GraceExceeded);
        assert!(outcomes[0].exit_code.is_none());
    }

    #[test]
    fn test_overrunning_finalizer_is_grace_exceeded() {
        let mut registry = FinalizerRegistry::new();
        registry.register(sh("slow", "sleep 5"));

        let runner = StepRunner::new(false);
        let outcomes = registry.run_all(&runner, Instant::now() + Duration::from_millis(200));

        assert_eq!(outcomes[0].status, FinalizerStatus::GraceExceeded);
    }

    #[test]
    fn test_empty_registry() {
        let registry = FinalizerRegistry::new();
        assert!(registry.is_empty());
        let runner = StepRunner::new(false);
        let outcomes = registry.run_all(&runner, Instant::now() + Duration::from_secs(1));
        assert!(outcomes.is_empty());
    }
}
