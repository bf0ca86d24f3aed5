//! Run state machine (run_state.json).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::{next_seq, now_rfc3339, TerminalState};
use crate::summary::Stage;

/// Schema version for run_state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "gpu-ci/run_state@1";

/// Run state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Run is queued, waiting to start
    Queued,
    /// Run is actively executing
    Running,
    /// Run completed successfully
    Succeeded,
    /// Run failed
    Failed,
    /// Run was cancelled
    Cancelled,
}

impl TerminalState for RunState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }
}

impl RunState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: RunState) -> bool {
        match (self, target) {
            // From QUEUED
            (RunState::Queued, RunState::Running) => true,
            (RunState::Queued, RunState::Cancelled) => true,
            (RunState::Queued, RunState::Failed) => true, // Can fail before starting

            // From RUNNING
            (RunState::Running, RunState::Succeeded) => true,
            (RunState::Running, RunState::Failed) => true,
            (RunState::Running, RunState::Cancelled) => true,

            // Terminal states cannot transition
            _ => false,
        }
    }
}

/// Run state artifact data (run_state.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateData {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// Current state
    pub state: RunState,

    /// When the run was created
    pub created_at: DateTime<Utc>,

    /// When the state was last updated
    pub updated_at: DateTime<Utc>,

    /// Stage currently executing (None when not running)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

/// Errors for run state operations
#[derive(Debug, thiserror::Error)]
pub enum RunStateError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunStateData {
    /// Create a new run in QUEUED state
    pub fn new(run_id: String) -> Self {
        let now = now_rfc3339();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id,
            state: RunState::Queued,
            created_at: now,
            updated_at: now,
            current_stage: None,
            seq: next_seq(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: RunState) -> Result<(), RunStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(RunStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = now_rfc3339();
        self.seq = next_seq();

        // Terminal states carry no current stage
        if new_state.is_terminal() {
            self.current_stage = None;
        }

        Ok(())
    }

    /// Start the run (QUEUED → RUNNING)
    pub fn start(&mut self) -> Result<(), RunStateError> {
        self.transition(RunState::Running)
    }

    /// Mark run as succeeded
    pub fn succeed(&mut self) -> Result<(), RunStateError> {
        self.transition(RunState::Succeeded)
    }

    /// Mark run as failed
    pub fn fail(&mut self) -> Result<(), RunStateError> {
        self.transition(RunState::Failed)
    }

    /// Cancel the run
    pub fn cancel(&mut self) -> Result<(), RunStateError> {
        self.transition(RunState::Cancelled)
    }

    /// Record the stage currently executing
    pub fn set_current_stage(&mut self, stage: Stage) {
        self.current_stage = Some(stage);
        self.updated_at = now_rfc3339();
        self.seq = next_seq();
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), RunStateError> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, RunStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Write to run directory as run_state.json
    pub fn write_to_run_dir(&self, run_dir: &Path) -> Result<(), RunStateError> {
        let path = run_dir.join("run_state.json");
        self.write_to_file(&path)
    }
}
