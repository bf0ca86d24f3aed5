//! End-to-end pipeline runs against stub tools.
//!
//! The stage sequence bottoms out in boundary calls; pointing the runtime,
//! installer, probe, runner, and uploader at stub commands exercises the
//! real orchestration: sequencing, early-exit, always-run coverage,
//! cancellation, artifact persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gpu_ci_lane::pipeline::{Pipeline, PipelineConfig, PipelineError};
use gpu_ci_lane::signal::SignalState;
use gpu_ci_lane::state::{RunState, RunStateData};
use gpu_ci_lane::summary::{ExitCode, Status};
use gpu_ci_lane::trigger::GitRef;

struct Fixture {
    _root: tempfile::TempDir,
    artifacts_dir: PathBuf,
    workspace: PathBuf,
    repo_config: PathBuf,
}

fn write_records(path: &Path) {
    fs::write(
        path,
        r#"{"files":{"src/scheduler/core.py":{"executed":[1,2,3,4],"missing":[5]}}}"#,
    )
    .unwrap();
}

/// Build a workspace where every boundary tool is a stub.
///
/// `probe_output` is what the device probe prints; `uploader` and `python`
/// select the stub commands for upload and install/examples.
fn fixture(probe_output: &str, uploader: &str, python: &str) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let artifacts_dir = root.path().join("artifacts");
    let workspace = root.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(workspace.join("scratch.txt"), "leftover\n").unwrap();

    let records = root.path().join("coverage_records.json");
    write_records(&records);

    let repo_config = root.path().join("gpu.toml");
    fs::write(
        &repo_config,
        format!(
            r#"
[container]
workspace = "{workspace}"
workspace_clean = "all"

[install]
python = "{python}"

[validate]
diagnostics = ["true"]
probe = ["sh", "-c", "echo {probe_output}"]

[standalone]
runner = "true"

[coverage]
records = "{records}"
uploader = "{uploader}"
"#,
            workspace = workspace.display(),
            python = python,
            probe_output = probe_output,
            records = records.display(),
            uploader = uploader,
        ),
    )
    .unwrap();

    Fixture {
        _root: root,
        artifacts_dir,
        workspace,
        repo_config,
    }
}

fn pipeline_for(fixture: &Fixture, state: Arc<SignalState>) -> Pipeline {
    Pipeline::new(
        PipelineConfig {
            repo_config_path: fixture.repo_config.clone(),
            host_config_path: None,
            artifacts_dir: fixture.artifacts_dir.clone(),
            runtime: "true".to_string(),
            verbose: false,
        },
        state,
    )
}

fn main_branch() -> GitRef {
    GitRef::Branch {
        name: "main".to_string(),
    }
}

#[test]
fn test_successful_run_produces_artifacts() {
    let fixture = fixture("2", "true", "true");
    let mut pipeline = pipeline_for(&fixture, Arc::new(SignalState::new()));

    let summary = pipeline
        .execute(main_branch(), "deadbeef".to_string())
        .unwrap();

    assert_eq!(summary.status, Status::Success);
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.stage_count, 6);
    assert_eq!(summary.stages_succeeded, 6);
    assert_eq!(summary.revision, "deadbeef");

    let run_dir = fixture.artifacts_dir.join(&summary.run_id);
    for artifact in [
        "run_plan.json",
        "run_state.json",
        "run_summary.json",
        "effective_config.json",
        "coverage_artifact.json",
        "finalizers.json",
    ] {
        assert!(run_dir.join(artifact).exists(), "missing {}", artifact);
    }
    assert!(run_dir.join("coverage/coverage.xml").exists());
    assert!(run_dir.join("coverage/coverage_summary.txt").exists());
    assert!(run_dir.join("coverage/htmlcov/index.html").exists());

    let state = RunStateData::from_file(&run_dir.join("run_state.json")).unwrap();
    assert_eq!(state.state, RunState::Succeeded);

    // Upload succeeded, so the artifact is sealed
    let artifact = fs::read_to_string(run_dir.join("coverage_artifact.json")).unwrap();
    assert!(artifact.contains("\"uploaded\": true"));
    assert!(artifact.contains("\"revision\": \"deadbeef\""));

    // Workspace cleanup finalizer emptied the workspace
    assert!(fixture.workspace.exists());
    assert_eq!(fs::read_dir(&fixture.workspace).unwrap().count(), 0);
}

#[test]
fn test_insufficient_devices_fails_and_skips_test_stages() {
    let fixture = fixture("1", "true", "true");
    let mut pipeline = pipeline_for(&fixture, Arc::new(SignalState::new()));

    let summary = pipeline
        .execute(main_branch(), "deadbeef".to_string())
        .unwrap();

    assert_eq!(summary.status, Status::Failed);
    assert_eq!(summary.exit_code, ExitCode::Precondition.as_i32());
    // provision + install + coverage succeeded, validate failed, tests skipped
    assert_eq!(summary.stages_succeeded, 3);
    assert_eq!(summary.stages_failed, 1);
    assert_eq!(summary.stages_skipped, 2);

    let run_dir = fixture.artifacts_dir.join(&summary.run_id);
    let state = RunStateData::from_file(&run_dir.join("run_state.json")).unwrap();
    assert_eq!(state.state, RunState::Failed);

    // Coverage is always-run: its artifacts exist despite the failure
    assert!(run_dir.join("coverage/coverage.xml").exists());
}

#[test]
fn test_upload_failure_does_not_gate_run() {
    let fixture = fixture("2", "false", "true");
    let mut pipeline = pipeline_for(&fixture, Arc::new(SignalState::new()));

    let summary = pipeline
        .execute(main_branch(), "deadbeef".to_string())
        .unwrap();

    assert_eq!(summary.status, Status::Success);
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.stages_failed, 1);

    let run_dir = fixture.artifacts_dir.join(&summary.run_id);
    let artifact = fs::read_to_string(run_dir.join("coverage_artifact.json")).unwrap();
    assert!(artifact.contains("\"uploaded\": false"));
}

#[test]
fn test_failing_example_stage_records_durations() {
    // A stub python: install passes, pytest prints duration lines and
    // fails on the first example.
    let fixture = fixture("2", "true", "true");
    let script = fixture.repo_config.parent().unwrap().join("fake_python.sh");
    fs::write(
        &script,
        "#!/bin/sh\n\
         case \"$*\" in\n\
           *pytest*)\n\
             printf '0.52s call     tests/test_examples.py::test_one\\n'\n\
             printf '0.11s setup    tests/test_examples.py::test_one\\n'\n\
             exit 1 ;;\n\
           *) exit 0 ;;\n\
         esac\n",
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    // Point install.python (and thus the example stage) at the stub
    let config_text = fs::read_to_string(&fixture.repo_config).unwrap();
    let config_text = config_text.replace(
        "python = \"true\"",
        &format!("python = \"{}\"", script.display()),
    );
    fs::write(&fixture.repo_config, config_text).unwrap();

    let mut pipeline = pipeline_for(&fixture, Arc::new(SignalState::new()));
    let summary = pipeline
        .execute(main_branch(), "deadbeef".to_string())
        .unwrap();

    assert_eq!(summary.status, Status::Failed);
    assert_eq!(summary.exit_code, ExitCode::TestFailed.as_i32());

    // Durations were reported for the tests that ran before the abort
    let run_dir = fixture.artifacts_dir.join(&summary.run_id);
    let durations = fs::read_to_string(run_dir.join("durations.json")).unwrap();
    assert!(durations.contains("tests/test_examples.py::test_one"));
    assert!(durations.contains("\"call\""));
}

#[test]
fn test_cancelled_before_first_stage() {
    let fixture = fixture("2", "true", "true");
    let state = Arc::new(SignalState::new());
    state.handle_signal();

    let mut pipeline = pipeline_for(&fixture, Arc::clone(&state));
    let summary = pipeline
        .execute(main_branch(), "deadbeef".to_string())
        .unwrap();

    assert_eq!(summary.status, Status::Cancelled);
    assert_eq!(summary.exit_code, ExitCode::Cancelled.as_i32());
    assert_eq!(summary.stages_cancelled, 1);
    assert_eq!(summary.stages_skipped, 5);

    let run_dir = fixture.artifacts_dir.join(&summary.run_id);
    let run_state = RunStateData::from_file(&run_dir.join("run_state.json")).unwrap();
    assert_eq!(run_state.state, RunState::Cancelled);
}

#[test]
fn test_feature_branch_not_triggered() {
    let fixture = fixture("2", "true", "true");
    let mut pipeline = pipeline_for(&fixture, Arc::new(SignalState::new()));

    let result = pipeline.execute(
        GitRef::Branch {
            name: "feature/faster-thaw".to_string(),
        },
        "deadbeef".to_string(),
    );

    assert!(matches!(result, Err(PipelineError::NotTriggered(_))));
    // Nothing ran, nothing was written
    assert!(!fixture.artifacts_dir.exists());
}
