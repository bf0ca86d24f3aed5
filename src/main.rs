//! GPU CI Lane CLI
//!
//! Entry point for the `gpu-ci` command-line tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use gpu_ci_lane::config::{host_config_path, EffectiveConfig, REPO_CONFIG_PATH};
use gpu_ci_lane::manifest::DistManifest;
use gpu_ci_lane::pipeline::{Pipeline, PipelineConfig, PipelineError};
use gpu_ci_lane::signal::{self, SignalHandler};
use gpu_ci_lane::step::StepRunner;
use gpu_ci_lane::summary::ExitCode;
use gpu_ci_lane::trigger::{GitRef, TriggerRules};
use gpu_ci_lane::validate::{assert_device_count, parse_device_count};

#[derive(Parser)]
#[command(name = "gpu-ci")]
#[command(about = "Containerized CI validation lane for GPU test suites", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the full pipeline for a ref and revision
    Run {
        /// Git ref (refs/heads/..., refs/tags/..., or a bare branch name)
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Treat the run as a pull request targeting this branch
        #[arg(long, conflicts_with = "git_ref")]
        pr_target: Option<String>,

        /// Source revision under test
        #[arg(long)]
        revision: String,

        /// Path to repo config file (default: .lane/gpu.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Artifacts directory
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Container runtime program
        #[arg(long, default_value = "docker")]
        runtime: String,

        /// Verbose progress on stderr
        #[arg(short, long)]
        verbose: bool,
    },

    /// Build and print the run plan without executing
    Plan {
        /// Git ref
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Treat the run as a pull request targeting this branch
        #[arg(long, conflicts_with = "git_ref")]
        pr_target: Option<String>,

        /// Source revision under test
        #[arg(long)]
        revision: String,

        /// Path to repo config file (default: .lane/gpu.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Explain the trigger decision for a ref
    Triggers {
        /// Git ref
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Treat the ref as a pull request targeting this branch
        #[arg(long, conflicts_with = "git_ref")]
        pr_target: Option<String>,

        /// Path to repo config file (default: .lane/gpu.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run the environment validation stage only
    Validate {
        /// Path to repo config file (default: .lane/gpu.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Verbose progress on stderr
        #[arg(short, long)]
        verbose: bool,
    },

    /// Packaging manifest commands
    Manifest {
        #[command(subcommand)]
        action: ManifestCommands,
    },

    /// Request cancellation of a running pipeline
    Cancel {
        /// Run ID to cancel
        run_id: String,

        /// Artifacts directory
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ManifestCommands {
    /// List the files selected for the distribution
    List {
        /// Source tree root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Path to repo config file (default: .lane/gpu.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Check the source tree against the packaging invariants
    Check {
        /// Source tree root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Path to repo config file (default: .lane/gpu.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            git_ref,
            pr_target,
            revision,
            config,
            artifacts,
            runtime,
            verbose,
        } => run_pipeline(git_ref, pr_target, revision, config, artifacts, runtime, verbose),
        Commands::Plan {
            git_ref,
            pr_target,
            revision,
            config,
        } => run_plan(git_ref, pr_target, revision, config),
        Commands::Triggers {
            git_ref,
            pr_target,
            config,
            json,
        } => run_triggers(git_ref, pr_target, config, json),
        Commands::Validate { config, verbose } => run_validate(config, verbose),
        Commands::Manifest { action } => match action {
            ManifestCommands::List { root, config } => run_manifest_list(root, config),
            ManifestCommands::Check { root, config, json } => run_manifest_check(root, config, json),
        },
        Commands::Cancel { run_id, artifacts } => run_cancel(&run_id, artifacts),
    }
}

fn parse_ref(git_ref: Option<String>, pr_target: Option<String>) -> GitRef {
    if let Some(target) = pr_target {
        return GitRef::PullRequest { target };
    }
    match git_ref {
        Some(s) => match GitRef::parse(&s) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => {
            eprintln!("Error: either --ref or --pr-target is required");
            process::exit(1);
        }
    }
}

fn pipeline_config(
    config: Option<PathBuf>,
    artifacts: Option<PathBuf>,
    runtime: String,
    verbose: bool,
) -> PipelineConfig {
    let mut pipeline_config = PipelineConfig {
        runtime,
        verbose,
        ..PipelineConfig::default()
    };
    if let Some(path) = config {
        pipeline_config.repo_config_path = path;
    }
    if let Some(dir) = artifacts {
        pipeline_config.artifacts_dir = dir;
    }
    pipeline_config
}

fn run_pipeline(
    git_ref: Option<String>,
    pr_target: Option<String>,
    revision: String,
    config: Option<PathBuf>,
    artifacts: Option<PathBuf>,
    runtime: String,
    verbose: bool,
) {
    let git_ref = parse_ref(git_ref, pr_target);

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        eprintln!("Error installing signal handler: {}", e);
        process::exit(1);
    }

    let mut pipeline = Pipeline::new(
        pipeline_config(config, artifacts, runtime, verbose),
        handler.state(),
    );

    match pipeline.execute(git_ref, revision) {
        Ok(summary) => {
            println!("{}", summary.human_summary);
            process::exit(summary.exit_code);
        }
        Err(PipelineError::NotTriggered(reason)) => {
            println!("Not triggered: {}", reason);
            process::exit(ExitCode::NotTriggered.as_i32());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run_plan(
    git_ref: Option<String>,
    pr_target: Option<String>,
    revision: String,
    config: Option<PathBuf>,
) {
    let git_ref = parse_ref(git_ref, pr_target);
    let handler = SignalHandler::new();

    let mut pipeline = Pipeline::new(
        pipeline_config(config, None, "docker".to_string(), false),
        handler.state(),
    );

    match pipeline.plan(git_ref, revision) {
        Ok(plan) => match serde_json::to_string_pretty(&plan) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing plan: {}", e);
                process::exit(1);
            }
        },
        Err(PipelineError::NotTriggered(reason)) => {
            println!("Not triggered: {}", reason);
            process::exit(ExitCode::NotTriggered.as_i32());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn load_effective(config: Option<PathBuf>) -> EffectiveConfig {
    let repo_path = config.unwrap_or_else(|| PathBuf::from(REPO_CONFIG_PATH));
    match EffectiveConfig::build(host_config_path().as_deref(), Some(&repo_path), None) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

fn run_triggers(
    git_ref: Option<String>,
    pr_target: Option<String>,
    config: Option<PathBuf>,
    json: bool,
) {
    let git_ref = parse_ref(git_ref, pr_target);
    let effective = load_effective(config);
    let lane = match effective.typed() {
        Ok(lane) => lane,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let rules = match TriggerRules::new(
        lane.triggers.branches.clone(),
        lane.triggers.tags,
        lane.triggers.pr_targets.clone(),
    ) {
        Ok(rules) => rules,
        Err(e) => {
            eprintln!("Trigger configuration error: {}", e);
            process::exit(1);
        }
    };

    let decision = rules.evaluate(&git_ref);

    if json {
        match serde_json::to_string_pretty(&decision) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing decision: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("{}: {}", git_ref, decision.reason);
    }

    if decision.activated {
        process::exit(0);
    } else {
        process::exit(ExitCode::NotTriggered.as_i32());
    }
}

fn run_validate(config: Option<PathBuf>, verbose: bool) {
    let effective = load_effective(config);
    let lane = match effective.typed() {
        Ok(lane) => lane,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let runner = StepRunner::new(verbose);
    let never = || false;

    let diag = gpu_ci_lane::validate::diagnostics_step(&lane.validate);
    match runner.run(&diag, None, &never) {
        Ok(outcome) if outcome.succeeded() => {
            if verbose {
                eprint!("{}", outcome.stdout);
            }
        }
        Ok(outcome) => {
            eprintln!("Diagnostics failed (exit {:?})", outcome.exit_code);
            process::exit(ExitCode::Precondition.as_i32());
        }
        Err(e) => {
            eprintln!("Diagnostics error: {}", e);
            process::exit(ExitCode::Executor.as_i32());
        }
    }

    let probe = gpu_ci_lane::validate::probe_step(&lane.validate);
    let outcome = match runner.run(&probe, None, &never) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Device probe error: {}", e);
            process::exit(ExitCode::Executor.as_i32());
        }
    };

    if !outcome.succeeded() {
        eprintln!("Device probe failed (exit {:?})", outcome.exit_code);
        process::exit(ExitCode::Precondition.as_i32());
    }

    match parse_device_count(&outcome.stdout)
        .and_then(|n| assert_device_count(n, lane.validate.min_devices).map(|()| n))
    {
        Ok(count) => {
            println!(
                "Environment valid: {} accelerator devices available ({} required)",
                count, lane.validate.min_devices
            );
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(ExitCode::Precondition.as_i32());
        }
    }
}

fn manifest_from_config(config: Option<PathBuf>) -> (DistManifest, String) {
    let effective = load_effective(config);
    let lane = match effective.typed() {
        Ok(lane) => lane,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let package_dir = lane.manifest.package_dir.clone();
    match DistManifest::with_defaults(&package_dir) {
        Ok(manifest) => (manifest, package_dir),
        Err(e) => {
            eprintln!("Manifest error: {}", e);
            process::exit(1);
        }
    }
}

fn run_manifest_list(root: PathBuf, config: Option<PathBuf>) {
    let (manifest, _) = manifest_from_config(config);
    match manifest.select(&root) {
        Ok(selected) => {
            for path in selected {
                println!("{}", path.display());
            }
        }
        Err(e) => {
            eprintln!("Manifest error: {}", e);
            process::exit(1);
        }
    }
}

fn run_manifest_check(root: PathBuf, config: Option<PathBuf>, json: bool) {
    let (manifest, package_dir) = manifest_from_config(config);
    match manifest.check(&root, &package_dir) {
        Ok(violations) => {
            if json {
                match serde_json::to_string_pretty(&violations) {
                    Ok(out) => println!("{}", out),
                    Err(e) => {
                        eprintln!("Error serializing violations: {}", e);
                        process::exit(1);
                    }
                }
            } else if violations.is_empty() {
                println!("Manifest clean: no violations");
            } else {
                for violation in &violations {
                    println!("{}: {}", violation.path, violation.reason);
                }
            }

            if violations.is_empty() {
                process::exit(0);
            }
            process::exit(ExitCode::ManifestViolation.as_i32());
        }
        Err(e) => {
            eprintln!("Manifest error: {}", e);
            process::exit(1);
        }
    }
}

fn run_cancel(run_id: &str, artifacts: Option<PathBuf>) {
    let artifacts_dir = artifacts.unwrap_or_else(|| PipelineConfig::default().artifacts_dir);
    let run_dir = artifacts_dir.join(run_id);

    if !run_dir.is_dir() {
        eprintln!("Run not found: {}", run_dir.display());
        process::exit(1);
    }

    match signal::write_marker(&run_dir) {
        Ok(()) => {
            println!("Cancel requested for run {}", run_id);
            println!("The pipeline will stop at the next step boundary.");
        }
        Err(e) => {
            eprintln!("Error writing cancel marker: {}", e);
            process::exit(1);
        }
    }
}
