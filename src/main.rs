//! CLI entry point. Loads a `Config` from a JSON file and drives
//! `validate`/`dry-run`/`run` — the DSL that produces that JSON is an
//! external collaborator (§1), so this binary only ever deserializes, never
//! parses a higher-level format itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use nexus_core::config::Config;
use nexus_core::scheduler::{self, RunOptions};
use nexus_core::telemetry::TracingTelemetrySink;

#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Dependency-graph task runner for local and SSH-reached hosts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the targets and task graph are well-formed, without running anything.
    Validate {
        #[arg(short, long)]
        config: PathBuf,
        /// Task names to target; defaults to every task in the config.
        tasks: Vec<String>,
    },
    /// Print the phase decomposition that `run` would execute.
    DryRun {
        #[arg(short, long)]
        config: PathBuf,
        tasks: Vec<String>,
    },
    /// Execute the targeted tasks and their dependencies.
    Run {
        #[arg(short, long)]
        config: PathBuf,
        tasks: Vec<String>,
        #[arg(long)]
        continue_on_error: bool,
        #[arg(long)]
        parallel_limit: Option<usize>,
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate { config, tasks } => {
            init_tracing(false);
            let config = match load_config(config) {
                Ok(config) => config,
                Err(err) => {
                    error!(error = ?err, "failed to load config");
                    std::process::exit(1);
                }
            };
            let targets = resolve_targets(&config, tasks);
            match scheduler::validate(&config, &targets) {
                Ok(()) => println!("ok"),
                Err(err) => {
                    eprintln!("validation failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::DryRun { config, tasks } => {
            init_tracing(false);
            let config = match load_config(config) {
                Ok(config) => config,
                Err(err) => {
                    error!(error = ?err, "failed to load config");
                    std::process::exit(1);
                }
            };
            let targets = resolve_targets(&config, tasks);
            match scheduler::dry_run(&config, &targets) {
                Ok(plan) => {
                    println!("total_tasks: {}", plan.total_tasks);
                    for (i, phase) in plan.phases.iter().enumerate() {
                        println!("phase {i}: {}", phase.join(", "));
                    }
                    for name in plan.phases.iter().flatten() {
                        if let Some(detail) = plan.task_details.get(name) {
                            println!(
                                "  {name}: on={} strategy={} commands={} deps=[{}]",
                                detail.on,
                                detail.strategy,
                                detail.commands,
                                detail.deps.join(", ")
                            );
                        }
                    }
                }
                Err(err) => {
                    eprintln!("dry run failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Run { config, tasks, continue_on_error, parallel_limit, verbose } => {
            init_tracing(*verbose);
            let config = match load_config(config) {
                Ok(config) => config,
                Err(err) => {
                    error!(error = ?err, "failed to load config");
                    std::process::exit(1);
                }
            };
            let targets = resolve_targets(&config, tasks);

            let options = RunOptions {
                continue_on_error: Some(*continue_on_error),
                parallel_limit: *parallel_limit,
                telemetry: Arc::new(TracingTelemetrySink),
                ..RunOptions::default()
            };

            info!(tasks = ?targets, "starting pipeline run");
            match scheduler::run(&config, &targets, options).await {
                Ok(result) => {
                    info!(
                        status = ?result.status,
                        tasks_run = result.tasks_run,
                        tasks_failed = result.tasks_failed,
                        duration_ms = result.duration_ms,
                        "pipeline run finished"
                    );
                    if result.tasks_failed > 0 {
                        std::process::exit(1);
                    }
                }
                Err(err) => {
                    error!(error = %err, "pipeline run could not start");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Mirrors the teacher's `loader::load_plan_from_file`: read, then parse,
/// each step wrapped in `.context(...)` so a failure names which one broke.
fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {path:?}"))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config at {path:?}"))
}

fn resolve_targets(config: &Config, requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        config.tasks.keys().cloned().collect()
    } else {
        requested.to_vec()
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
