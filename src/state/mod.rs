//! Run and stage state machines.
//!
//! Run states: QUEUED → RUNNING → {SUCCEEDED | FAILED | CANCELLED}
//! Stage states: PENDING → RUNNING → {SUCCEEDED | FAILED | SKIPPED | CANCELLED}

mod run_state;
mod stage_state;

pub use run_state::{RunState, RunStateData, RunStateError};
pub use stage_state::{StageState, StageStateError};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering state updates within one process
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Get current UTC timestamp in RFC 3339 format
pub fn now_rfc3339() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
