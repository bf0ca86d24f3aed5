//! Run budget enforcement.
//!
//! A run is bounded by a wall-clock timeout (default 20 minutes). Once the
//! deadline passes, all stages are forcibly terminated; only registered
//! finalizers may still run, inside an additional cancellation grace
//! window (default 2 minutes). Enforcement is entirely host-driven: the
//! enforcer only reports budget status, the pipeline terminates steps.

use std::time::{Duration, Instant};

/// Default overall run timeout in minutes
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 20;

/// Default cancellation grace window in minutes
pub const DEFAULT_CANCEL_GRACE_MINUTES: u64 = 2;

/// Budget configuration
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    /// Maximum wall-clock time for the whole run, in minutes
    pub timeout_minutes: u64,

    /// Grace window for finalizers beyond the deadline, in minutes
    pub cancel_grace_minutes: u64,
}

impl Default for RunBudget {
    fn default() -> Self {
        Self {
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            cancel_grace_minutes: DEFAULT_CANCEL_GRACE_MINUTES,
        }
    }
}

impl RunBudget {
    /// Validate budget bounds
    pub fn validate(&self) -> Result<(), BudgetValidationError> {
        // timeout_minutes must be in (0, 1440]
        if self.timeout_minutes == 0 || self.timeout_minutes > 1440 {
            return Err(BudgetValidationError::TimeoutOutOfBounds {
                value: self.timeout_minutes,
            });
        }

        // cancel_grace_minutes must be in (0, 60]
        if self.cancel_grace_minutes == 0 || self.cancel_grace_minutes > 60 {
            return Err(BudgetValidationError::GraceOutOfBounds {
                value: self.cancel_grace_minutes,
            });
        }

        Ok(())
    }

    /// Overall timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Grace window as a Duration
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_minutes * 60)
    }
}

/// Budget validation errors
#[derive(Debug, thiserror::Error)]
pub enum BudgetValidationError {
    #[error("timeout_minutes must be in (0, 1440], got {value}")]
    TimeoutOutOfBounds { value: u64 },

    #[error("cancel_grace_minutes must be in (0, 60], got {value}")]
    GraceOutOfBounds { value: u64 },
}

/// Budget check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Within budget
    Ok,
    /// Run deadline passed; only finalizers may run
    Exceeded,
    /// Grace window also passed; nothing may run
    GraceExceeded,
}

impl BudgetStatus {
    /// Returns true if the run deadline has passed
    pub fn is_exceeded(&self) -> bool {
        !matches!(self, BudgetStatus::Ok)
    }
}

/// Budget enforcer for a run
#[derive(Debug)]
pub struct BudgetEnforcer {
    budget: RunBudget,
    start_time: Instant,
}

impl BudgetEnforcer {
    /// Create a new enforcer, starting the clock now
    pub fn new(budget: RunBudget) -> Self {
        Self {
            budget,
            start_time: Instant::now(),
        }
    }

    /// Create with default budget
    pub fn with_defaults() -> Self {
        Self::new(RunBudget::default())
    }

    /// Check the current budget status
    pub fn check(&self) -> BudgetStatus {
        let elapsed = self.start_time.elapsed();
        if elapsed <= self.budget.timeout() {
            BudgetStatus::Ok
        } else if elapsed <= self.budget.timeout() + self.budget.grace() {
            BudgetStatus::Exceeded
        } else {
            BudgetStatus::GraceExceeded
        }
    }

    /// Elapsed time since the run started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Remaining time before the run deadline (zero once passed)
    pub fn remaining(&self) -> Duration {
        self.budget.timeout().saturating_sub(self.elapsed())
    }

    /// The step deadline: an Instant at the run deadline
    pub fn step_deadline(&self) -> Instant {
        self.start_time + self.budget.timeout()
    }

    /// Remaining grace time for finalizers (zero once passed).
    ///
    /// Before the run deadline this is the full grace window; past the
    /// deadline it shrinks until the grace window closes.
    pub fn grace_remaining(&self) -> Duration {
        let hard_stop = self.budget.timeout() + self.budget.grace();
        hard_stop.saturating_sub(self.elapsed().max(self.budget.timeout()))
    }

    /// The finalizer deadline: an Instant at the end of the grace window
    pub fn grace_deadline(&self) -> Instant {
        self.start_time + self.budget.timeout() + self.budget.grace()
    }

    /// Get the budget
    pub fn budget(&self) -> &RunBudget {
        &self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_default_budget() {
        let budget = RunBudget::default();
        assert_eq!(budget.timeout_minutes, 20);
        assert_eq!(budget.cancel_grace_minutes, 2);
        assert_eq!(budget.timeout(), Duration::from_secs(1200));
        assert_eq!(budget.grace(), Duration::from_secs(120));
    }

    #[test]
    fn test_validation_valid() {
        assert!(RunBudget::default().validate().is_ok());
    }

    #[test]
    fn test_validation_timeout_zero() {
        let budget = RunBudget {
            timeout_minutes: 0,
            cancel_grace_minutes: 2,
        };
        assert!(matches!(
            budget.validate(),
            Err(BudgetValidationError::TimeoutOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_validation_timeout_too_large() {
        let budget = RunBudget {
            timeout_minutes: 1441,
            cancel_grace_minutes: 2,
        };
        assert!(matches!(
            budget.validate(),
            Err(BudgetValidationError::TimeoutOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_validation_grace_out_of_bounds() {
        let budget = RunBudget {
            timeout_minutes: 20,
            cancel_grace_minutes: 61,
        };
        assert!(matches!(
            budget.validate(),
            Err(BudgetValidationError::GraceOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_enforcer_within_budget() {
        let enforcer = BudgetEnforcer::with_defaults();
        assert_eq!(enforcer.check(), BudgetStatus::Ok);
        assert!(enforcer.remaining() > Duration::from_secs(1100));
    }

    #[test]
    fn test_grace_remaining_full_before_deadline() {
        let enforcer = BudgetEnforcer::with_defaults();
        let grace = enforcer.grace_remaining();
        assert!(grace > Duration::from_secs(119));
        assert!(grace <= Duration::from_secs(120));
    }

    #[test]
    fn test_enforcer_deadlines_ordered() {
        let enforcer = BudgetEnforcer::with_defaults();
        assert!(enforcer.step_deadline() < enforcer.grace_deadline());
    }

    #[test]
    fn test_minimal_budget_stays_ok_while_fresh() {
        let budget = RunBudget {
            timeout_minutes: 1,
            cancel_grace_minutes: 1,
        };
        let enforcer = BudgetEnforcer::new(budget);
        sleep(Duration::from_millis(10));
        assert_eq!(enforcer.check(), BudgetStatus::Ok);
        assert!(enforcer.remaining() <= Duration::from_secs(60));
    }

    #[test]
    fn test_budget_status_is_exceeded() {
        assert!(!BudgetStatus::Ok.is_exceeded());
        assert!(BudgetStatus::Exceeded.is_exceeded());
        assert!(BudgetStatus::GraceExceeded.is_exceeded());
    }
}
