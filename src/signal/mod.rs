//! Signal handling for graceful shutdown (SIGINT/SIGTERM).
//!
//! On the first signal the run is cancelled gracefully: the current step is
//! terminated, finalizers run inside the grace window, and state/summary
//! artifacts are persisted with state=CANCELLED before exiting with code
//! 80. A second signal requests immediate exit (state is still persisted);
//! further signals are ignored.
//!
//! Cancellation can also arrive out-of-band as a `cancel.requested` marker
//! file in the run directory, written by `gpu-ci cancel <run-id>`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Name of the out-of-band cancel marker file
pub const CANCEL_MARKER: &str = "cancel.requested";

/// Signal handler state
#[derive(Debug)]
pub struct SignalState {
    /// First signal received (cancellation initiated)
    cancel_requested: AtomicBool,
    /// Second signal received (immediate exit requested)
    immediate_exit: AtomicBool,
    /// Signal count (for tracking the double-signal escalation)
    signal_count: AtomicU8,
    /// Run directory, used to poll for the cancel marker
    run_dir: Mutex<Option<PathBuf>>,
}

impl SignalState {
    /// Create a new signal state
    pub fn new() -> Self {
        Self {
            cancel_requested: AtomicBool::new(false),
            immediate_exit: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
            run_dir: Mutex::new(None),
        }
    }

    /// Check if cancellation has been requested via signal
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Check if immediate exit has been requested (double signal)
    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal, returning the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancel_requested.store(true, Ordering::SeqCst);
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }

    /// Set the run directory polled for the cancel marker
    pub fn set_run_dir(&self, path: PathBuf) {
        if let Ok(mut dir) = self.run_dir.lock() {
            *dir = Some(path);
        }
    }

    /// Get the run directory
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.run_dir.lock().ok().and_then(|dir| dir.clone())
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: initiate graceful cancellation
    InitiateCancellation,
    /// Second signal: exit immediately (but still persist state)
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal handler that manages the signal state
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a new signal handler
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    /// Get a reference to the signal state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the SIGINT/SIGTERM handlers. Must be called once at
    /// program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || {
            let action = state.handle_signal();
            match action {
                SignalAction::InitiateCancellation => {
                    eprintln!("\nReceived interrupt signal, cancelling run...");
                }
                SignalAction::ImmediateExit => {
                    eprintln!("\nReceived second interrupt, exiting immediately...");
                }
                SignalAction::Ignore => {}
            }
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation coordinator: combines signal state with the out-of-band
/// cancel marker. The pipeline polls this between steps.
pub struct CancellationCoordinator {
    state: Arc<SignalState>,
}

impl CancellationCoordinator {
    /// Create a new coordinator with the given signal state
    pub fn new(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    /// Check if cancellation has been requested by signal or marker
    pub fn is_cancelled(&self) -> bool {
        if self.state.is_cancel_requested() {
            return true;
        }
        self.state
            .run_dir()
            .map(|dir| marker_exists(&dir))
            .unwrap_or(false)
    }

    /// Check if immediate exit has been requested
    pub fn should_exit_immediately(&self) -> bool {
        self.state.is_immediate_exit()
    }

    /// Set the run directory polled for the cancel marker
    pub fn set_run_dir(&self, dir: PathBuf) {
        self.state.set_run_dir(dir);
    }
}

/// Check whether the cancel marker exists under `run_dir`
pub fn marker_exists(run_dir: &Path) -> bool {
    run_dir.join(CANCEL_MARKER).exists()
}

/// Write the cancel marker under `run_dir`
pub fn write_marker(run_dir: &Path) -> std::io::Result<()> {
    std::fs::write(run_dir.join(CANCEL_MARKER), b"cancel\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_state_initial() {
        let state = SignalState::new();
        assert!(!state.is_cancel_requested());
        assert!(!state.is_immediate_exit());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_first_signal_initiates_cancellation() {
        let state = SignalState::new();
        let action = state.handle_signal();

        assert_eq!(action, SignalAction::InitiateCancellation);
        assert!(state.is_cancel_requested());
        assert!(!state.is_immediate_exit());
    }

    #[test]
    fn test_second_signal_requests_immediate_exit() {
        let state = SignalState::new();
        state.handle_signal();
        let action = state.handle_signal();

        assert_eq!(action, SignalAction::ImmediateExit);
        assert!(state.is_immediate_exit());
    }

    #[test]
    fn test_third_signal_ignored() {
        let state = SignalState::new();
        state.handle_signal();
        state.handle_signal();
        let action = state.handle_signal();

        assert_eq!(action, SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);
    }

    #[test]
    fn test_coordinator_signal_cancellation() {
        let state = Arc::new(SignalState::new());
        let coordinator = CancellationCoordinator::new(Arc::clone(&state));

        assert!(!coordinator.is_cancelled());
        state.handle_signal();
        assert!(coordinator.is_cancelled());
    }

    #[test]
    fn test_coordinator_marker_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(SignalState::new());
        let coordinator = CancellationCoordinator::new(Arc::clone(&state));
        coordinator.set_run_dir(dir.path().to_path_buf());

        assert!(!coordinator.is_cancelled());
        write_marker(dir.path()).unwrap();
        assert!(coordinator.is_cancelled());
    }

    #[test]
    fn test_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!marker_exists(dir.path()));
        write_marker(dir.path()).unwrap();
        assert!(marker_exists(dir.path()));
    }
}
