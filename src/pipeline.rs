//! Pipeline orchestration.
//!
//! Runs the stage sequence for one job: provision the container
//! environment, install the project, validate the accelerator
//! precondition, execute the standalone and example test stages, then
//! render and upload coverage. Stages are strictly sequential with
//! early-exit on fatal failure; the coverage stage is always-run, and
//! registered finalizers execute inside the cancellation grace window
//! whatever the outcome.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use lane_coverage::{write_artifacts, CoverageArtifact, CoverageRecords, UploadSpec};

use crate::cleanup::FinalizerRegistry;
use crate::config::{
    host_config_path, ConfigError, EffectiveConfig, LaneConfig, REPO_CONFIG_PATH,
};
use crate::install::install_step;
use crate::provision::{ContainerSpec, ImageCoordinates, Provisioner};
use crate::signal::{CancellationCoordinator, SignalState};
use crate::state::{RunState, RunStateData, RunStateError};
use crate::step::{StepError, StepRunner, StepSpec, StepStatus};
use crate::budget::BudgetEnforcer;
use crate::suite::{examples_step, parse_durations, read_results, standalone_step, DurationsReport};
use crate::summary::{FailureSubkind, RunSummary, Stage, StageSummary, Status};
use crate::trigger::{GitRef, TriggerError, TriggerRules};
use crate::validate::{
    assert_device_count, diagnostics_step, parse_device_count, probe_step, ValidateError,
};

/// Schema version for run_plan.json
pub const RUN_PLAN_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_plan.json
pub const RUN_PLAN_SCHEMA_ID: &str = "gpu-ci/run_plan@1";

/// Pipeline errors.
///
/// Stage failures are not errors: they surface through summaries and the
/// aggregated exit code. Errors here are infrastructure problems that
/// prevent the pipeline from running at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("not triggered: {0}")]
    NotTriggered(String),

    #[error("state error: {0}")]
    State(#[from] RunStateError),

    #[error("step error: {0}")]
    Step(#[from] StepError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 1,
            PipelineError::Trigger(_) => 1,
            PipelineError::NotTriggered(_) => 3,
            PipelineError::State(_) => 90,
            PipelineError::Step(_) => 90,
            PipelineError::Io(_) => 1,
            PipelineError::Serialization(_) => 1,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to repo config file
    pub repo_config_path: PathBuf,

    /// Path to host config file (default: ~/.config/lane/gpu.toml)
    pub host_config_path: Option<PathBuf>,

    /// Path to artifacts directory
    pub artifacts_dir: PathBuf,

    /// Container runtime program
    pub runtime: String,

    /// Verbose output
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            repo_config_path: PathBuf::from(REPO_CONFIG_PATH),
            host_config_path: host_config_path(),
            artifacts_dir: PathBuf::from(format!("{}/.local/share/lane/artifacts/gpu", home)),
            runtime: "docker".to_string(),
            verbose: false,
        }
    }
}

/// One planned stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePlan {
    /// Which stage
    pub stage: Stage,

    /// Boundary-call steps the stage will issue
    pub steps: Vec<StepSpec>,
}

/// The run plan (run_plan.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// Source revision
    pub revision: String,

    /// The ref that triggered the run
    pub git_ref: GitRef,

    /// When the plan was created
    pub created_at: DateTime<Utc>,

    /// Pool the job is scheduled on
    pub pool: String,

    /// Resolved container image reference
    pub image_reference: String,

    /// Planned stages in execution order
    pub stages: Vec<StagePlan>,
}

/// How a stage ended, from the orchestrator's point of view
enum StageEnd {
    Continue,
    FatalFailure,
    Cancelled,
    TimedOut,
}

/// Pipeline execution context
pub struct Pipeline {
    config: PipelineConfig,
    lane_config: Option<LaneConfig>,
    effective: Option<EffectiveConfig>,
    cancellation: CancellationCoordinator,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration and signal state
    pub fn new(config: PipelineConfig, signal_state: Arc<SignalState>) -> Self {
        Self {
            config,
            lane_config: None,
            effective: None,
            cancellation: CancellationCoordinator::new(signal_state),
        }
    }

    /// Load and merge configuration
    fn load_config(&mut self) -> PipelineResult<()> {
        let effective = EffectiveConfig::build(
            self.config.host_config_path.as_deref(),
            Some(&self.config.repo_config_path),
            None,
        )?;
        self.lane_config = Some(effective.typed()?);
        self.effective = Some(effective);
        Ok(())
    }

    fn lane(&self) -> &LaneConfig {
        self.lane_config
            .as_ref()
            .expect("config loaded before stage execution")
    }

    /// Evaluate the trigger rules for a ref
    fn evaluate_trigger(&self, git_ref: &GitRef) -> PipelineResult<()> {
        let triggers = &self.lane().triggers;
        let rules = TriggerRules::new(
            triggers.branches.clone(),
            triggers.tags,
            triggers.pr_targets.clone(),
        )?;

        let decision = rules.evaluate(git_ref);
        if !decision.activated {
            return Err(PipelineError::NotTriggered(decision.reason));
        }

        if self.config.verbose {
            eprintln!("Trigger: {}", decision.reason);
        }
        Ok(())
    }

    /// Build the run plan without executing anything
    pub fn plan(&mut self, git_ref: GitRef, revision: String) -> PipelineResult<RunPlan> {
        self.load_config()?;
        self.evaluate_trigger(&git_ref)?;

        let run_id = Ulid::new().to_string();
        let run_dir = self.config.artifacts_dir.join(&run_id);
        Ok(self.build_plan(run_id, revision, git_ref, &run_dir))
    }

    fn container_spec(&self) -> ContainerSpec {
        container_spec_of(self.lane())
    }

    fn build_plan(
        &self,
        run_id: String,
        revision: String,
        git_ref: GitRef,
        run_dir: &std::path::Path,
    ) -> RunPlan {
        let lane = self.lane();
        let provisioner = Provisioner::new(&self.config.runtime);
        let container_spec = self.container_spec();

        let upload = UploadSpec {
            program: lane.coverage.uploader.clone(),
            commit: revision.clone(),
            flags: lane.coverage.flags.clone(),
            name: lane.coverage.name.clone(),
            env_tags: lane.coverage.env_tags.clone(),
        };
        let mut upload_step = StepSpec::new("coverage-upload", upload.argv()).always_run();
        if !lane.coverage.fatal {
            upload_step = upload_step.non_fatal();
        }

        let stages = vec![
            StagePlan {
                stage: Stage::Provision,
                steps: vec![provisioner.provision_step(&container_spec)],
            },
            StagePlan {
                stage: Stage::Install,
                steps: vec![install_step(&lane.install)],
            },
            StagePlan {
                stage: Stage::Validate,
                steps: vec![diagnostics_step(&lane.validate), probe_step(&lane.validate)],
            },
            StagePlan {
                stage: Stage::StandaloneTests,
                steps: vec![standalone_step(
                    &lane.standalone,
                    &run_dir.join("runner_results.json"),
                )],
            },
            StagePlan {
                stage: Stage::ExampleTests,
                steps: vec![examples_step(&lane.examples, &lane.install.python)],
            },
            StagePlan {
                stage: Stage::Coverage,
                steps: vec![upload_step],
            },
        ];

        RunPlan {
            schema_version: RUN_PLAN_SCHEMA_VERSION,
            schema_id: RUN_PLAN_SCHEMA_ID.to_string(),
            run_id,
            revision,
            git_ref,
            created_at: Utc::now(),
            pool: lane.job.pool.clone(),
            image_reference: container_spec.image.reference(),
            stages,
        }
    }

    /// Execute the full pipeline for a ref + revision
    pub fn execute(&mut self, git_ref: GitRef, revision: String) -> PipelineResult<RunSummary> {
        let start_time = Instant::now();

        self.load_config()?;
        self.evaluate_trigger(&git_ref)?;

        let run_id = Ulid::new().to_string();
        let run_dir = self.config.artifacts_dir.join(&run_id);
        fs::create_dir_all(&run_dir)?;
        self.cancellation.set_run_dir(run_dir.clone());

        if let Some(effective) = self.effective.take() {
            effective
                .with_run_id(run_id.clone())
                .write_to_run_dir(&run_dir)?;
        }

        let plan = self.build_plan(run_id.clone(), revision.clone(), git_ref, &run_dir);
        fs::write(
            run_dir.join("run_plan.json"),
            serde_json::to_string_pretty(&plan)?,
        )?;

        let mut run_state = RunStateData::new(run_id.clone());
        run_state.write_to_run_dir(&run_dir)?;
        run_state.start()?;
        run_state.write_to_run_dir(&run_dir)?;

        let lane = self.lane().clone();
        let enforcer = BudgetEnforcer::new(lane.job.budget());
        let runner = StepRunner::new(self.config.verbose);

        let mut finalizers = FinalizerRegistry::new();
        if let Some(cleanup) = Provisioner::cleanup_step(
            lane.container.workspace_clean,
            &lane.container.workspace,
        ) {
            finalizers.register(cleanup);
        }

        let mut summaries: Vec<StageSummary> = Vec::new();
        let mut fatal_failed = false;
        let mut run_over = false;

        for stage_plan in &plan.stages {
            let stage = stage_plan.stage;

            if run_over || (fatal_failed && !stage.always_run()) {
                summaries.push(StageSummary::skipped(run_id.clone(), stage));
                continue;
            }

            run_state.set_current_stage(stage);
            run_state.write_to_run_dir(&run_dir)?;

            if self.config.verbose {
                eprintln!("Stage: {}", stage);
            }

            let (summary, end) =
                self.execute_stage(stage, &lane, &run_id, &run_dir, &revision, &enforcer, &runner)?;
            summaries.push(summary);

            match end {
                StageEnd::Continue => {}
                StageEnd::FatalFailure => fatal_failed = true,
                StageEnd::Cancelled | StageEnd::TimedOut => run_over = true,
            }
        }

        // Finalizers run whatever happened, bounded by the grace window and
        // never past the hard stop.
        let grace_deadline = std::cmp::min(
            Instant::now() + enforcer.budget().grace(),
            enforcer.grace_deadline(),
        );
        let finalizer_outcomes = finalizers.run_all(&runner, grace_deadline);
        if !finalizer_outcomes.is_empty() {
            fs::write(
                run_dir.join("finalizers.json"),
                serde_json::to_string_pretty(&finalizer_outcomes)?,
            )?;
        }

        let summary = RunSummary::from_stage_summaries(
            run_id.clone(),
            revision,
            &summaries,
            start_time.elapsed().as_millis() as u64,
            lane.coverage.fatal,
        );

        let final_state = match summary.status {
            Status::Success => RunState::Succeeded,
            Status::Cancelled => RunState::Cancelled,
            _ => RunState::Failed,
        };
        run_state.transition(final_state)?;
        run_state.write_to_run_dir(&run_dir)?;

        summary.write_to_run_dir(&run_dir)?;

        if self.config.verbose {
            eprintln!("{}", summary.human_summary);
            eprintln!("Artifacts: {}", run_dir.display());
        }

        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_stage(
        &self,
        stage: Stage,
        lane: &LaneConfig,
        run_id: &str,
        run_dir: &std::path::Path,
        revision: &str,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        match stage {
            Stage::Provision => self.run_provision(lane, run_id, enforcer, runner),
            Stage::Install => self.run_install(lane, run_id, enforcer, runner),
            Stage::Validate => self.run_validate(lane, run_id, enforcer, runner),
            Stage::StandaloneTests => self.run_standalone(lane, run_id, run_dir, enforcer, runner),
            Stage::ExampleTests => self.run_examples(lane, run_id, run_dir, enforcer, runner),
            Stage::Coverage => self.run_coverage(lane, run_id, run_dir, revision, enforcer, runner),
        }
    }

    /// Run one step, translating interruptions into stage terminations
    fn run_step(
        &self,
        spec: &StepSpec,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<crate::step::StepOutcome> {
        let cancelled = || self.cancellation.is_cancelled();
        Ok(runner.run(spec, Some(enforcer.step_deadline()), &cancelled)?)
    }

    /// Interpret an interrupted step, if it was interrupted
    fn interrupted(
        &self,
        run_id: &str,
        stage: Stage,
        outcome: &crate::step::StepOutcome,
    ) -> Option<(StageSummary, StageEnd)> {
        match outcome.status {
            StepStatus::Cancelled => Some((
                StageSummary::cancelled(run_id.to_string(), stage, outcome.duration_ms),
                StageEnd::Cancelled,
            )),
            StepStatus::TimedOut => {
                let mut summary =
                    StageSummary::cancelled(run_id.to_string(), stage, outcome.duration_ms);
                summary.failure_subkind = Some(FailureSubkind::TimeoutOverall);
                summary.human_summary = format!("{} terminated by run timeout", stage);
                Some((summary, StageEnd::TimedOut))
            }
            _ => None,
        }
    }

    fn run_provision(
        &self,
        lane: &LaneConfig,
        run_id: &str,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        let provisioner = Provisioner::new(&self.config.runtime);
        let spec = provisioner.provision_step(&container_spec_of(lane));

        let outcome = match self.run_step(&spec, enforcer, runner) {
            Ok(outcome) => outcome,
            Err(PipelineError::Step(e)) => {
                return Ok(executor_failure(run_id, Stage::Provision, &e.to_string()));
            }
            Err(e) => return Err(e),
        };

        if let Some(end) = self.interrupted(run_id, Stage::Provision, &outcome) {
            return Ok(end);
        }

        if outcome.succeeded() {
            Ok((
                StageSummary::success(run_id.to_string(), Stage::Provision, outcome.duration_ms),
                StageEnd::Continue,
            ))
        } else {
            let subkind = Provisioner::classify_failure(&outcome);
            Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::Provision,
                    subkind,
                    format!(
                        "container provisioning failed (exit {:?})",
                        outcome.exit_code
                    ),
                    outcome.duration_ms,
                ),
                StageEnd::FatalFailure,
            ))
        }
    }

    fn run_install(
        &self,
        lane: &LaneConfig,
        run_id: &str,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        let spec = install_step(&lane.install);

        let outcome = match self.run_step(&spec, enforcer, runner) {
            Ok(outcome) => outcome,
            Err(PipelineError::Step(e)) => {
                return Ok(executor_failure(run_id, Stage::Install, &e.to_string()));
            }
            Err(e) => return Err(e),
        };

        if let Some(end) = self.interrupted(run_id, Stage::Install, &outcome) {
            return Ok(end);
        }

        if outcome.succeeded() {
            Ok((
                StageSummary::success(run_id.to_string(), Stage::Install, outcome.duration_ms),
                StageEnd::Continue,
            ))
        } else {
            Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::Install,
                    Some(FailureSubkind::DependencyResolution),
                    format!("dependency install failed (exit {:?})", outcome.exit_code),
                    outcome.duration_ms,
                ),
                StageEnd::FatalFailure,
            ))
        }
    }

    fn run_validate(
        &self,
        lane: &LaneConfig,
        run_id: &str,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        let start = Instant::now();

        let diag = diagnostics_step(&lane.validate);
        let diag_outcome = match self.run_step(&diag, enforcer, runner) {
            Ok(outcome) => outcome,
            Err(PipelineError::Step(e)) => {
                return Ok(executor_failure(run_id, Stage::Validate, &e.to_string()));
            }
            Err(e) => return Err(e),
        };
        if let Some(end) = self.interrupted(run_id, Stage::Validate, &diag_outcome) {
            return Ok(end);
        }
        if !diag_outcome.succeeded() {
            return Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::Validate,
                    None,
                    format!(
                        "diagnostics failed (exit {:?})",
                        diag_outcome.exit_code
                    ),
                    start.elapsed().as_millis() as u64,
                ),
                StageEnd::FatalFailure,
            ));
        }

        let probe = probe_step(&lane.validate);
        let probe_outcome = match self.run_step(&probe, enforcer, runner) {
            Ok(outcome) => outcome,
            Err(PipelineError::Step(e)) => {
                return Ok(executor_failure(run_id, Stage::Validate, &e.to_string()));
            }
            Err(e) => return Err(e),
        };
        if let Some(end) = self.interrupted(run_id, Stage::Validate, &probe_outcome) {
            return Ok(end);
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        if !probe_outcome.succeeded() {
            return Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::Validate,
                    None,
                    format!("device probe failed (exit {:?})", probe_outcome.exit_code),
                    duration_ms,
                ),
                StageEnd::FatalFailure,
            ));
        }

        let check = parse_device_count(&probe_outcome.stdout)
            .and_then(|available| {
                assert_device_count(available, lane.validate.min_devices).map(|()| available)
            });

        match check {
            Ok(available) => {
                let mut summary =
                    StageSummary::success(run_id.to_string(), Stage::Validate, duration_ms);
                summary.human_summary = format!(
                    "validate succeeded ({} accelerator devices available)",
                    available
                );
                Ok((summary, StageEnd::Continue))
            }
            Err(e) => {
                let subkind = match e {
                    ValidateError::InsufficientDevices { .. } => {
                        Some(FailureSubkind::InsufficientDevices)
                    }
                    ValidateError::UnparseableCount(_) => None,
                };
                Ok((
                    StageSummary::failure(
                        run_id.to_string(),
                        Stage::Validate,
                        subkind,
                        e.to_string(),
                        duration_ms,
                    ),
                    StageEnd::FatalFailure,
                ))
            }
        }
    }

    fn run_standalone(
        &self,
        lane: &LaneConfig,
        run_id: &str,
        run_dir: &std::path::Path,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        let results_path = run_dir.join("runner_results.json");
        let spec = standalone_step(&lane.standalone, &results_path);

        let outcome = match self.run_step(&spec, enforcer, runner) {
            Ok(outcome) => outcome,
            Err(PipelineError::Step(e)) => {
                return Ok(executor_failure(
                    run_id,
                    Stage::StandaloneTests,
                    &e.to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        if let Some(end) = self.interrupted(run_id, Stage::StandaloneTests, &outcome) {
            return Ok(end);
        }

        // The runner aggregates pass/fail itself; its results artifact
        // carries the counts when present.
        let counts = read_results(&results_path)
            .map(|r| format!("{} of {} standalone tests failed", r.failed, r.total))
            .unwrap_or_else(|_| "runner results unavailable".to_string());

        if outcome.succeeded() {
            let mut summary = StageSummary::success(
                run_id.to_string(),
                Stage::StandaloneTests,
                outcome.duration_ms,
            );
            if let Ok(results) = read_results(&results_path) {
                summary.human_summary = format!(
                    "standalone-tests succeeded ({} tests, filter '{}')",
                    results.total, results.filter
                );
            }
            Ok((summary, StageEnd::Continue))
        } else {
            Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::StandaloneTests,
                    Some(FailureSubkind::StandaloneAggregate),
                    counts,
                    outcome.duration_ms,
                ),
                StageEnd::FatalFailure,
            ))
        }
    }

    fn run_examples(
        &self,
        lane: &LaneConfig,
        run_id: &str,
        run_dir: &std::path::Path,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        let spec = examples_step(&lane.examples, &lane.install.python);

        let outcome = match self.run_step(&spec, enforcer, runner) {
            Ok(outcome) => outcome,
            Err(PipelineError::Step(e)) => {
                return Ok(executor_failure(
                    run_id,
                    Stage::ExampleTests,
                    &e.to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        if let Some(end) = self.interrupted(run_id, Stage::ExampleTests, &outcome) {
            return Ok(end);
        }

        // Durations are reported for every test that ran, pass or fail.
        let durations = parse_durations(&outcome.stdout);
        if !durations.is_empty() {
            DurationsReport::new(durations).write_to_file(&run_dir.join("durations.json"))?;
        }

        if outcome.succeeded() {
            Ok((
                StageSummary::success(
                    run_id.to_string(),
                    Stage::ExampleTests,
                    outcome.duration_ms,
                ),
                StageEnd::Continue,
            ))
        } else {
            Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::ExampleTests,
                    Some(FailureSubkind::FailFast),
                    format!(
                        "example tests aborted at first failure (exit {:?})",
                        outcome.exit_code
                    ),
                    outcome.duration_ms,
                ),
                StageEnd::FatalFailure,
            ))
        }
    }

    fn run_coverage(
        &self,
        lane: &LaneConfig,
        run_id: &str,
        run_dir: &std::path::Path,
        revision: &str,
        enforcer: &BudgetEnforcer,
        runner: &StepRunner,
    ) -> PipelineResult<(StageSummary, StageEnd)> {
        let start = Instant::now();
        let fatal_end = || {
            if lane.coverage.fatal {
                StageEnd::FatalFailure
            } else {
                StageEnd::Continue
            }
        };

        let records = match CoverageRecords::from_file(&lane.coverage.records) {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => {
                return Ok((
                    StageSummary::failure(
                        run_id.to_string(),
                        Stage::Coverage,
                        None,
                        "coverage records are empty".to_string(),
                        start.elapsed().as_millis() as u64,
                    ),
                    fatal_end(),
                ));
            }
            Err(e) => {
                return Ok((
                    StageSummary::failure(
                        run_id.to_string(),
                        Stage::Coverage,
                        None,
                        format!("coverage records unreadable: {}", e),
                        start.elapsed().as_millis() as u64,
                    ),
                    fatal_end(),
                ));
            }
        };

        let coverage_dir = run_dir.join("coverage");
        if let Err(e) = write_artifacts(&records, &coverage_dir) {
            return Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::Coverage,
                    None,
                    format!("coverage rendering failed: {}", e),
                    start.elapsed().as_millis() as u64,
                ),
                fatal_end(),
            ));
        }

        let totals = records.totals();
        let mut artifact = match CoverageArtifact::new(
            revision.to_string(),
            lane.coverage.flags.clone(),
            lane.coverage.name.clone(),
            lane.coverage.env_tags.clone(),
            totals,
        ) {
            Ok(artifact) => artifact,
            Err(e) => {
                return Ok((
                    StageSummary::failure(
                        run_id.to_string(),
                        Stage::Coverage,
                        None,
                        format!("coverage artifact error: {}", e),
                        start.elapsed().as_millis() as u64,
                    ),
                    fatal_end(),
                ));
            }
        };

        let upload = UploadSpec {
            program: lane.coverage.uploader.clone(),
            commit: revision.to_string(),
            flags: lane.coverage.flags.clone(),
            name: lane.coverage.name.clone(),
            env_tags: lane.coverage.env_tags.clone(),
        };
        let spec = StepSpec::new("coverage-upload", upload.argv()).always_run();

        let upload_ok = match self.run_step(&spec, enforcer, runner) {
            Ok(outcome) => {
                if let Some(end) = self.interrupted(run_id, Stage::Coverage, &outcome) {
                    let _ = artifact.write_to_file(&run_dir.join("coverage_artifact.json"));
                    return Ok(end);
                }
                outcome.succeeded()
            }
            Err(PipelineError::Step(_)) => false,
            Err(e) => return Err(e),
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        if upload_ok {
            // Immutable from here on.
            let _ = artifact.mark_uploaded();
        }
        let _ = artifact.write_to_file(&run_dir.join("coverage_artifact.json"));

        if upload_ok {
            let mut summary =
                StageSummary::success(run_id.to_string(), Stage::Coverage, duration_ms);
            summary.human_summary = format!(
                "coverage uploaded ({:.0}% over {} statements)",
                totals.percent, totals.statements
            );
            Ok((summary, StageEnd::Continue))
        } else {
            Ok((
                StageSummary::failure(
                    run_id.to_string(),
                    Stage::Coverage,
                    Some(FailureSubkind::UploadFailed),
                    "coverage upload failed".to_string(),
                    duration_ms,
                ),
                fatal_end(),
            ))
        }
    }
}

/// Build the container spec from the typed config
fn container_spec_of(lane: &LaneConfig) -> ContainerSpec {
    let container = &lane.container;
    ContainerSpec {
        image: ImageCoordinates {
            repository: container.repository.clone(),
            toolchain: container.toolchain.clone(),
            accelerator_toolkit: container.accelerator_toolkit.clone(),
        },
        entrypoint: container.entrypoint.clone(),
        device_request: container.device_request,
        mounts: container.mounts.clone(),
        workspace: container.workspace.clone(),
        workspace_clean: container.workspace_clean,
    }
}

/// A stage failure caused by the executor itself (spawn failure etc.)
fn executor_failure(run_id: &str, stage: Stage, detail: &str) -> (StageSummary, StageEnd) {
    let mut summary = StageSummary::failure(
        run_id.to_string(),
        stage,
        None,
        format!("executor error: {}", detail),
        0,
    );
    summary.failure_kind = Some(crate::summary::FailureKind::Executor);
    let end = if stage.always_run() {
        StageEnd::Continue
    } else {
        StageEnd::FatalFailure
    };
    (summary, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.repo_config_path, PathBuf::from(".lane/gpu.toml"));
        assert_eq!(config.runtime, "docker");
        assert!(!config.verbose);
    }

    #[test]
    fn test_pipeline_error_exit_codes() {
        assert_eq!(
            PipelineError::NotTriggered("feature branch".to_string()).exit_code(),
            3
        );
        assert_eq!(
            PipelineError::Config(ConfigError::Invalid("bad".to_string())).exit_code(),
            1
        );
    }

    #[test]
    fn test_plan_contains_all_stages_in_order() {
        let state = Arc::new(SignalState::new());
        let mut pipeline = Pipeline::new(
            PipelineConfig {
                repo_config_path: PathBuf::from("/nonexistent/.lane/gpu.toml"),
                host_config_path: None,
                ..PipelineConfig::default()
            },
            state,
        );

        let plan = pipeline
            .plan(
                GitRef::Branch {
                    name: "main".to_string(),
                },
                "abc123".to_string(),
            )
            .unwrap();

        let stages: Vec<Stage> = plan.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, Stage::ORDER.to_vec());
        assert_eq!(plan.revision, "abc123");
        assert_eq!(
            plan.image_reference,
            "lane-images/gpu:py3.9-torch1.11-cuda11.3"
        );
    }

    #[test]
    fn test_plan_not_triggered_for_feature_branch() {
        let state = Arc::new(SignalState::new());
        let mut pipeline = Pipeline::new(
            PipelineConfig {
                repo_config_path: PathBuf::from("/nonexistent/.lane/gpu.toml"),
                host_config_path: None,
                ..PipelineConfig::default()
            },
            state,
        );

        let result = pipeline.plan(
            GitRef::Branch {
                name: "feature/x".to_string(),
            },
            "abc123".to_string(),
        );
        assert!(matches!(result, Err(PipelineError::NotTriggered(_))));
    }

    #[test]
    fn test_plan_standalone_step_carries_filter() {
        let state = Arc::new(SignalState::new());
        let mut pipeline = Pipeline::new(
            PipelineConfig {
                repo_config_path: PathBuf::from("/nonexistent/.lane/gpu.toml"),
                host_config_path: None,
                ..PipelineConfig::default()
            },
            state,
        );

        let plan = pipeline
            .plan(
                GitRef::Tag {
                    name: "v1.0".to_string(),
                },
                "abc123".to_string(),
            )
            .unwrap();

        let standalone = plan
            .stages
            .iter()
            .find(|s| s.stage == Stage::StandaloneTests)
            .unwrap();
        assert!(standalone.steps[0]
            .argv
            .contains(&"test_fts_multi_".to_string()));

        let coverage = plan
            .stages
            .iter()
            .find(|s| s.stage == Stage::Coverage)
            .unwrap();
        assert!(coverage.steps[0].always_run);
        assert!(!coverage.steps[0].fatal);
        assert!(coverage.steps[0].argv.contains(&"gpu,pytest".to_string()));
    }
}
