//! Standalone runner integration.
//!
//! Selection exactness and per-process aggregation through the
//! lane-runner library, driven with stub interpreters.

use std::fs;
use std::path::Path;

use lane_runner::{discover_tests, run_suite, NameFilter, RunnerConfig, TestStatus};

fn write_suite(dir: &Path) {
    fs::write(
        dir.join("test_scheduler.py"),
        "import pytest\n\n\
         def test_fts_multi_dp(tmpdir):\n    pass\n\n\
         def test_fts_multi_ddp(tmpdir):\n    pass\n\n\
         def test_fts_multi_ddp_sharded(tmpdir):\n    pass\n\n\
         def test_fts_single_gpu(tmpdir):\n    pass\n\n\
         def test_resume_from_checkpoint(tmpdir):\n    pass\n",
    )
    .unwrap();
    fs::write(
        dir.join("test_examples.py"),
        "def test_examples_cli(tmpdir):\n    pass\n",
    )
    .unwrap();
}

#[test]
fn test_selection_is_exactly_the_prefix_matches() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let cases = discover_tests(dir.path(), &NameFilter::new("test_fts_multi_")).unwrap();
    let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "test_fts_multi_ddp",
            "test_fts_multi_ddp_sharded",
            "test_fts_multi_dp",
        ]
    );
}

#[test]
fn test_selection_excludes_near_misses() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("test_tricky.py"),
        "def test_fts_multi(tmpdir):\n    pass\n\n\
         def test_fts_multi_x(tmpdir):\n    pass\n\n\
         def helper_test_fts_multi_y():\n    pass\n",
    )
    .unwrap();

    let cases = discover_tests(dir.path(), &NameFilter::new("test_fts_multi_")).unwrap();
    let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();

    // `test_fts_multi` lacks the trailing underscore; the helper is not a
    // top-level test function.
    assert_eq!(names, vec!["test_fts_multi_x"]);
}

#[test]
fn test_all_isolated_processes_pass() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let config = RunnerConfig {
        python: "true".to_string(),
        timeout_seconds: 10,
        grace_seconds: 1,
        verbose: false,
    };
    let results = run_suite(dir.path(), &NameFilter::new("test_fts_multi_"), config).unwrap();

    assert_eq!(results.total, 3);
    assert_eq!(results.passed, 3);
    assert!(results.all_passed());
    assert!(results
        .outcomes
        .iter()
        .all(|o| o.status == TestStatus::Passed));
}

#[test]
fn test_failures_aggregate_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let config = RunnerConfig {
        python: "false".to_string(),
        timeout_seconds: 10,
        grace_seconds: 1,
        verbose: false,
    };
    let results = run_suite(dir.path(), &NameFilter::new("test_fts_multi_"), config).unwrap();

    assert_eq!(results.total, 3);
    assert_eq!(results.failed, 3);
    assert!(!results.all_passed());
}

#[test]
fn test_empty_selection_passes_vacuously() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let results = run_suite(
        dir.path(),
        &NameFilter::new("test_nonexistent_prefix_"),
        RunnerConfig::default(),
    )
    .unwrap();

    assert_eq!(results.total, 0);
    assert!(results.all_passed());
}

#[test]
fn test_results_artifact_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    write_suite(dir.path());

    let config = RunnerConfig {
        python: "true".to_string(),
        timeout_seconds: 10,
        grace_seconds: 1,
        verbose: false,
    };
    let results = run_suite(dir.path(), &NameFilter::new("test_fts_multi_"), config).unwrap();

    let path = dir.path().join("runner_results.json");
    results.write_to_file(&path).unwrap();

    let loaded = lane_runner::RunnerResults::from_file(&path).unwrap();
    assert_eq!(loaded.total, results.total);
    assert_eq!(loaded.filter, "test_fts_multi_");
}
