//! Shell step execution.
//!
//! Every pipeline stage bottoms out in boundary calls to external tools
//! (container runtime, package installer, test runners, uploader). A step
//! is one such invocation: argv, extra environment, and failure policy.
//! Steps run under a drop-by-default environment allowlist and a deadline;
//! a step that outlives its deadline or a cancellation request is killed.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Environment variable allowlist for pipeline steps
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

/// Errors from step execution
#[derive(Debug, Error)]
pub enum StepError {
    #[error("empty argv for step {0}")]
    EmptyArgv(String),

    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One external-tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name for display and artifacts
    pub name: String,

    /// Full argv, program first
    pub argv: Vec<String>,

    /// Working directory (inherit when None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Extra environment on top of the allowlist
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Step runs even after an earlier fatal failure
    #[serde(default)]
    pub always_run: bool,

    /// Non-zero exit aborts the remainder of the run
    #[serde(default = "default_fatal")]
    pub fatal: bool,
}

fn default_fatal() -> bool {
    true
}

impl StepSpec {
    /// A fatal step with no extra environment
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            workdir: None,
            env: HashMap::new(),
            always_run: false,
            fatal: true,
        }
    }

    /// Mark the step always-run
    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }

    /// Mark the step non-fatal
    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    /// Set the working directory
    pub fn in_dir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    /// Render the invocation for display
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Outcome of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Invocation identifier
    pub invocation_id: String,

    /// Step name
    pub name: String,

    /// Terminal status
    pub status: StepStatus,

    /// Process exit code (None when killed or never exited normally)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Captured stdout
    pub stdout: String,

    /// Captured stderr
    pub stderr: String,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl StepOutcome {
    /// Whether the step succeeded
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Runs steps under the allowlisted environment
pub struct StepRunner {
    verbose: bool,
}

impl StepRunner {
    /// Create a new runner
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Build the drop-by-default environment plus the step's extras
    fn build_environment(&self, spec: &StepSpec) -> HashMap<String, String> {
        let mut env = HashMap::new();
        for key in ENV_ALLOWLIST {
            if let Ok(value) = std::env::var(key) {
                env.insert((*key).to_string(), value);
            }
        }
        for (key, value) in &spec.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Execute a step.
    ///
    /// The step is killed when `deadline` passes or `cancelled` returns
    /// true; the outcome records which.
    pub fn run(
        &self,
        spec: &StepSpec,
        deadline: Option<Instant>,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<StepOutcome, StepError> {
        let program = spec
            .argv
            .first()
            .ok_or_else(|| StepError::EmptyArgv(spec.name.clone()))?
            .clone();

        if self.verbose {
            eprintln!("[{}] {}", spec.name, spec.command_line());
        }

        let start = Instant::now();
        let env = self.build_environment(spec);

        let mut command = Command::new(&program);
        command
            .args(&spec.argv[1..])
            .env_clear()
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = spec.workdir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| StepError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        // Drain output on threads so a chatty child never blocks on a full
        // pipe while we poll for exit.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let stdout_handle = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });
        let stderr_handle = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });

        let status = loop {
            if cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                break StepStatus::Cancelled;
            }

            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    break StepStatus::TimedOut;
                }
            }

            match child.try_wait()? {
                Some(status) => {
                    break if status.success() {
                        StepStatus::Succeeded
                    } else {
                        StepStatus::Failed
                    };
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        let exit_code = child.try_wait().ok().flatten().and_then(|s| s.code());

        Ok(StepOutcome {
            invocation_id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            status,
            exit_code,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_cancelled() -> impl Fn() -> bool {
        || false
    }

    fn sh(name: &str, script: &str) -> StepSpec {
        StepSpec::new(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        )
    }

    #[test]
    fn test_successful_step() {
        let runner = StepRunner::new(false);
        let outcome = runner
            .run(&sh("ok", "exit 0"), None, &never_cancelled())
            .unwrap();

        assert_eq!(outcome.status, StepStatus::Succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.succeeded());
    }

    #[test]
    fn test_failing_step() {
        let runner = StepRunner::new(false);
        let outcome = runner
            .run(&sh("bad", "exit 3"), None, &never_cancelled())
            .unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[test]
    fn test_captures_output() {
        let runner = StepRunner::new(false);
        let outcome = runner
            .run(
                &sh("echoes", "echo out; echo err >&2"),
                None,
                &never_cancelled(),
            )
            .unwrap();

        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
    }

    #[test]
    fn test_deadline_kills_step() {
        let runner = StepRunner::new(false);
        let deadline = Instant::now() + Duration::from_millis(200);
        let outcome = runner
            .run(&sh("slow", "sleep 5"), Some(deadline), &never_cancelled())
            .unwrap();

        assert_eq!(outcome.status, StepStatus::TimedOut);
        assert!(outcome.duration_ms < 5000);
    }

    #[test]
    fn test_cancellation_kills_step() {
        let runner = StepRunner::new(false);
        let outcome = runner
            .run(&sh("slow", "sleep 5"), None, &|| true)
            .unwrap();

        assert_eq!(outcome.status, StepStatus::Cancelled);
    }

    #[test]
    fn test_spawn_failure() {
        let runner = StepRunner::new(false);
        let spec = StepSpec::new("missing", vec!["/nonexistent/tool".to_string()]);
        let result = runner.run(&spec, None, &never_cancelled());

        assert!(matches!(result, Err(StepError::SpawnFailed { .. })));
    }

    #[test]
    fn test_empty_argv_rejected() {
        let runner = StepRunner::new(false);
        let spec = StepSpec::new("empty", vec![]);
        let result = runner.run(&spec, None, &never_cancelled());

        assert!(matches!(result, Err(StepError::EmptyArgv(_))));
    }

    #[test]
    fn test_extra_env_reaches_child() {
        let runner = StepRunner::new(false);
        let mut spec = sh("env", "printf '%s' \"$LANE_MARKER\"");
        spec.env
            .insert("LANE_MARKER".to_string(), "present".to_string());

        let outcome = runner.run(&spec, None, &never_cancelled()).unwrap();
        assert_eq!(outcome.stdout, "present");
    }

    #[test]
    fn test_builder_flags() {
        let spec = StepSpec::new("s", vec!["true".to_string()])
            .always_run()
            .non_fatal();
        assert!(spec.always_run);
        assert!(!spec.fatal);
    }
}
