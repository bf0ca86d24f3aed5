//! Standalone multi-device stage invocation.
//!
//! The stage is a boundary call to the dedicated runner binary; the runner
//! owns per-test process isolation and pass/fail aggregation. The host
//! passes the name filter through as `-k` and reads the results artifact
//! back.

use std::path::Path;

use lane_runner::RunnerResults;

use crate::config::StandaloneConfig;
use crate::step::StepSpec;

/// Build the runner invocation for the standalone stage
pub fn standalone_step(config: &StandaloneConfig, results_path: &Path) -> StepSpec {
    StepSpec::new(
        "standalone-tests",
        vec![
            config.runner.clone(),
            "-k".to_string(),
            config.filter.clone(),
            "--tests-dir".to_string(),
            config.tests_dir.display().to_string(),
            "--results".to_string(),
            results_path.display().to_string(),
            "--timeout-seconds".to_string(),
            config.timeout_seconds.to_string(),
            "--grace-seconds".to_string(),
            config.grace_seconds.to_string(),
        ],
    )
}

/// Read the runner's results artifact
pub fn read_results(path: &Path) -> std::io::Result<RunnerResults> {
    RunnerResults::from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_step_passes_filter_through() {
        let config = StandaloneConfig::default();
        let step = standalone_step(&config, Path::new("/runs/r1/runner_results.json"));

        assert_eq!(step.argv[0], "lane-runner");
        let k_pos = step.argv.iter().position(|a| a == "-k").unwrap();
        assert_eq!(step.argv[k_pos + 1], "test_fts_multi_");
        assert!(step.fatal);
    }

    #[test]
    fn test_step_carries_timeouts() {
        let config = StandaloneConfig {
            timeout_seconds: 120,
            grace_seconds: 5,
            ..StandaloneConfig::default()
        };
        let step = standalone_step(&config, Path::new("results.json"));

        let t_pos = step
            .argv
            .iter()
            .position(|a| a == "--timeout-seconds")
            .unwrap();
        assert_eq!(step.argv[t_pos + 1], "120");
        let g_pos = step
            .argv
            .iter()
            .position(|a| a == "--grace-seconds")
            .unwrap();
        assert_eq!(step.argv[g_pos + 1], "5");
    }

    #[test]
    fn test_custom_tests_dir() {
        let config = StandaloneConfig {
            tests_dir: PathBuf::from("suite/standalone"),
            ..StandaloneConfig::default()
        };
        let step = standalone_step(&config, Path::new("results.json"));
        assert!(step.argv.contains(&"suite/standalone".to_string()));
    }
}
