//! lane-runner entrypoint.
//!
//! Invoked by the pipeline host as the standalone multi-device test stage:
//!
//!   lane-runner -k test_fts_multi_ --tests-dir tests --results runner_results.json
//!
//! Exits 0 when every selected test passed (including an empty selection),
//! 1 when any isolated test did not pass, 2 on runner errors.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use lane_runner::{discover_tests, run_suite, NameFilter, RunnerConfig};

#[derive(Parser)]
#[command(name = "lane-runner")]
#[command(about = "Process-isolated standalone test runner", version)]
struct Cli {
    /// Name-prefix filter for test selection
    #[arg(short = 'k', long = "filter")]
    filter: String,

    /// Directory containing the test files
    #[arg(long, default_value = "tests")]
    tests_dir: PathBuf,

    /// Path for the results artifact
    #[arg(long, default_value = "runner_results.json")]
    results: PathBuf,

    /// Python interpreter for the per-test processes
    #[arg(long, default_value = "python")]
    python: String,

    /// Per-test timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_seconds: u64,

    /// SIGTERM-to-SIGKILL grace period in seconds
    #[arg(long, default_value_t = 30)]
    grace_seconds: u64,

    /// List the selected tests without running them
    #[arg(long)]
    list: bool,

    /// Verbose progress on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = NameFilter::new(cli.filter);

    if cli.list {
        return match discover_tests(&cli.tests_dir, &filter) {
            Ok(cases) => {
                for case in &cases {
                    println!("{}", case.node_id());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("lane-runner: {}", e);
                ExitCode::from(2)
            }
        };
    }

    let config = RunnerConfig {
        python: cli.python,
        timeout_seconds: cli.timeout_seconds,
        grace_seconds: cli.grace_seconds,
        verbose: cli.verbose,
    };

    let results = match run_suite(&cli.tests_dir, &filter, config) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("lane-runner: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = results.write_to_file(&cli.results) {
        eprintln!("lane-runner: failed to write results: {}", e);
        return ExitCode::from(2);
    }

    if cli.verbose {
        eprintln!(
            "[lane-runner] {} selected, {} passed, {} failed",
            results.total, results.passed, results.failed
        );
    }

    if results.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
