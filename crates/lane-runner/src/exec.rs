//! Isolated test execution.
//!
//! Each selected test runs in a fresh OS process so exclusive accelerator
//! claims and process-global framework state never leak between tests.
//! Tests run sequentially; the accelerators are claimed for one test at a
//! time. Cancellation and per-test timeouts terminate the child with
//! SIGTERM, wait out a grace period, then SIGKILL.

use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::discover::TestCase;
use crate::results::{TestOutcome, TestStatus};

/// Environment variable allowlist. Drop-by-default: only these reach the
/// test subprocess.
pub const ENV_ALLOWLIST: &[&str] = &[
    "HOME",
    "PATH",
    "TMPDIR",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TERM",
    "USER",
    "LOGNAME",
    "PYTHONPATH",
    "VIRTUAL_ENV",
    "CONDA_PREFIX",
    "CONDA_DEFAULT_ENV",
    "CUDA_VISIBLE_DEVICES",
    "NVIDIA_VISIBLE_DEVICES",
];

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Python interpreter used to launch the per-test process
    pub python: String,

    /// Per-test wall-clock timeout
    pub timeout_seconds: u64,

    /// Grace period between SIGTERM and SIGKILL
    pub grace_seconds: u64,

    /// Verbose progress on stderr
    pub verbose: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            timeout_seconds: 300,
            grace_seconds: 30,
            verbose: false,
        }
    }
}

/// Executes test cases one process at a time
pub struct IsolatedExecutor {
    config: RunnerConfig,
    cancelled: Arc<AtomicBool>,
}

impl IsolatedExecutor {
    /// Create a new executor
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shareable cancellation flag
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Request cancellation of the remaining tests
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Build the drop-by-default environment for a test process
    fn build_environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        for key in ENV_ALLOWLIST {
            if let Ok(value) = std::env::var(key) {
                env.insert((*key).to_string(), value);
            }
        }
        env
    }

    /// Run a single test case in its own process
    pub fn run_case(&self, case: &TestCase) -> TestOutcome {
        let start = Instant::now();

        if self.is_cancelled() {
            return TestOutcome::not_run(case, TestStatus::Cancelled);
        }

        if self.config.verbose {
            eprintln!("[lane-runner] running {}", case.node_id());
        }

        let env = self.build_environment();
        let spawn = Command::new(&self.config.python)
            .args(["-m", "pytest", &case.node_id(), "-v"])
            .env_clear()
            .envs(&env)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawn {
            Ok(child) => child,
            Err(e) => {
                return TestOutcome {
                    name: case.name.clone(),
                    file: case.file.display().to_string(),
                    status: TestStatus::Error,
                    exit_code: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    detail: Some(format!("failed to spawn: {}", e)),
                };
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_seconds);

        let status = loop {
            if self.is_cancelled() {
                self.terminate_child(&mut child);
                break TestStatus::Cancelled;
            }

            if start.elapsed() > timeout {
                self.terminate_child(&mut child);
                break TestStatus::TimedOut;
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    break if status.success() {
                        TestStatus::Passed
                    } else {
                        TestStatus::Failed
                    };
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(100)),
                Err(_) => break TestStatus::Error,
            }
        };

        let exit_code = child.try_wait().ok().flatten().and_then(|s| s.code());

        TestOutcome {
            name: case.name.clone(),
            file: case.file.display().to_string(),
            status,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: None,
        }
    }

    /// SIGTERM, wait for the grace period, then SIGKILL
    fn terminate_child(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        let grace = Duration::from_secs(self.config.grace_seconds);
        let start = Instant::now();
        while start.elapsed() < grace {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(Duration::from_millis(100)),
                Err(_) => return,
            }
        }

        let _ = child.kill();
        let _ = child.wait();
    }
}
