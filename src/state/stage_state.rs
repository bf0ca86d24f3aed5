//! Stage state machine.
//!
//! Stages move PENDING → RUNNING → {SUCCEEDED | FAILED | CANCELLED}, or
//! directly PENDING → SKIPPED when an earlier fatal failure aborts the
//! remainder of the run.

use serde::{Deserialize, Serialize};

use super::TerminalState;

/// Stage state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    /// Stage has not started
    Pending,
    /// Stage is executing
    Running,
    /// Stage completed successfully
    Succeeded,
    /// Stage failed
    Failed,
    /// Stage never ran because of an earlier fatal failure
    Skipped,
    /// Stage was cancelled mid-flight
    Cancelled,
}

impl TerminalState for StageState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded
                | StageState::Failed
                | StageState::Skipped
                | StageState::Cancelled
        )
    }
}

/// Errors for stage state operations
#[derive(Debug, thiserror::Error)]
pub enum StageStateError {
    #[error("Invalid stage transition from {from:?} to {to:?}")]
    InvalidTransition { from: StageState, to: StageState },
}

impl StageState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: StageState) -> bool {
        match (self, target) {
            (StageState::Pending, StageState::Running) => true,
            (StageState::Pending, StageState::Skipped) => true,
            (StageState::Pending, StageState::Cancelled) => true,

            (StageState::Running, StageState::Succeeded) => true,
            (StageState::Running, StageState::Failed) => true,
            (StageState::Running, StageState::Cancelled) => true,

            _ => false,
        }
    }

    /// Transition, validating legality
    pub fn transition(self, target: StageState) -> Result<StageState, StageStateError> {
        if !self.can_transition_to(target) {
            return Err(StageStateError::InvalidTransition {
                from: self,
                to: target,
            });
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = StageState::Pending;
        let state = state.transition(StageState::Running).unwrap();
        let state = state.transition(StageState::Succeeded).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_pending_can_skip() {
        assert!(StageState::Pending
            .transition(StageState::Skipped)
            .is_ok());
    }

    #[test]
    fn test_running_cannot_skip() {
        assert!(StageState::Running
            .transition(StageState::Skipped)
            .is_err());
    }

    #[test]
    fn test_terminal_states_stuck() {
        for terminal in [
            StageState::Succeeded,
            StageState::Failed,
            StageState::Skipped,
            StageState::Cancelled,
        ] {
            assert!(terminal.transition(StageState::Running).is_err());
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_cancel_from_pending_and_running() {
        assert!(StageState::Pending
            .transition(StageState::Cancelled)
            .is_ok());
        assert!(StageState::Running
            .transition(StageState::Cancelled)
            .is_ok());
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_string(&StageState::Skipped).unwrap(),
            r#""SKIPPED""#
        );
    }
}
