//! Pipeline scheduler: the crate's top-level entry point. Validates
//! targets, builds the DAG, induces the subgraph reachable from the
//! requested tasks, decomposes it into phases, and runs each phase with up
//! to `parallel_limit` tasks in flight at once.
//!
//! Grounded on the teacher's `main::execute_plan` (load → validate → limits
//! → execute → report) for the overall shape, and on `DagPlanner::execute`'s
//! `Semaphore`-bounded `JoinSet` fan-out for the per-phase concurrency cap.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::SchedulerError;
use crate::exec::Dispatcher;
use crate::facts::FactsProvider;
use crate::graph::Graph;
use crate::task::{run_task, TaskResult, TaskStatus};
use crate::telemetry::{events, Measurements, Metadata, NullTelemetrySink, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub duration_ms: u64,
    pub tasks_run: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub task_results: Vec<TaskResult>,
    pub aborted_at: Option<String>,
}

/// Static per-task facts shown alongside a dry-run's phase decomposition.
#[derive(Debug, Clone)]
pub struct TaskDetail {
    pub on: String,
    pub strategy: String,
    pub commands: usize,
    pub deps: Vec<String>,
}

/// The static result of `dry_run`: the phase decomposition the scheduler
/// would execute, with no command ever spawned or SSH session opened.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub total_tasks: usize,
    pub phases: Vec<Vec<String>>,
    pub task_details: std::collections::HashMap<String, TaskDetail>,
}

/// Caller-supplied knobs for `run`. `parallel_limit`/`continue_on_error`
/// default to `config.defaults`' values when left `None`; a caller that
/// wants to override the config (e.g. a CLI `--continue-on-error` flag)
/// sets them explicitly.
#[derive(Clone)]
pub struct RunOptions {
    pub continue_on_error: Option<bool>,
    pub parallel_limit: Option<usize>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub facts: Arc<dyn FactsProvider>,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            continue_on_error: None,
            parallel_limit: None,
            telemetry: Arc::new(NullTelemetrySink),
            facts: Arc::new(crate::facts::StaticFacts::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Front-end precheck: the same target-resolution and cycle checks `run`
/// performs, without building a dispatcher or touching a single host.
pub fn validate(config: &Config, target_tasks: &[String]) -> Result<(), SchedulerError> {
    resolve_targets(config, target_tasks)?;
    Graph::build(&config.tasks)?;
    Ok(())
}

/// Purely static: the phase decomposition `run` would execute, with the
/// same target resolution and subgraph induction `run` performs.
pub fn dry_run(
    config: &Config,
    target_tasks: &[String],
) -> Result<ExecutionPlan, SchedulerError> {
    resolve_targets(config, target_tasks)?;
    let graph = Graph::build(&config.tasks)?;
    let subgraph = graph.subgraph_for(target_tasks);
    let phases = subgraph.phases();

    let task_details = subgraph
        .task_names()
        .map(|name| {
            let task = &config.tasks[name];
            let on = match &task.on {
                crate::config::OnTarget::Local => "local".to_string(),
                crate::config::OnTarget::Named(name) => name.clone(),
            };
            let strategy = match task.strategy {
                crate::config::Strategy::Parallel => "parallel".to_string(),
                crate::config::Strategy::Serial => "serial".to_string(),
                crate::config::Strategy::Rolling => {
                    format!("rolling(batch_size={})", task.batch_size)
                }
            };
            let detail = TaskDetail {
                on,
                strategy,
                commands: task.commands.len(),
                deps: task.deps.iter().cloned().collect(),
            };
            (name.clone(), detail)
        })
        .collect();

    Ok(ExecutionPlan { total_tasks: subgraph.task_names().count(), phases, task_details })
}

/// Runs the pipeline: builds and induces the DAG exactly as `dry_run` does,
/// then executes phase by phase, up to `options.parallel_limit` tasks
/// concurrently per phase.
pub async fn run(
    config: &Config,
    target_tasks: &[String],
    options: RunOptions,
) -> Result<PipelineResult, SchedulerError> {
    resolve_targets(config, target_tasks)?;
    let graph = Graph::build(&config.tasks)?;
    let subgraph = graph.subgraph_for(target_tasks);
    let phases = subgraph.phases();

    let continue_on_error = options.continue_on_error.unwrap_or(config.defaults.continue_on_error);
    let parallel_limit = options.parallel_limit.unwrap_or(config.defaults.parallel_limit).max(1);

    let dispatcher = Arc::new(Dispatcher::new(config, Arc::clone(&options.telemetry)));
    let semaphore = Arc::new(Semaphore::new(parallel_limit));

    let started = Instant::now();
    options.telemetry.emit(events::PIPELINE_START, &Measurements::default(), &Metadata::new());

    let mut task_results = Vec::new();
    let mut aborted_at = None;

    'phases: for phase in &phases {
        if options.cancel.is_cancelled() {
            break;
        }

        let mut join_set = JoinSet::new();
        for task_name in phase {
            let task = config.tasks[task_name].clone();
            let config = config.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let facts = Arc::clone(&options.facts);
            let telemetry = Arc::clone(&options.telemetry);
            let cancel = options.cancel.clone();
            let permit = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                run_task(&config, &task, dispatcher, facts, telemetry, cancel, continue_on_error)
                    .await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    let failed = result.status == TaskStatus::Error;
                    let name = result.task.clone();
                    task_results.push(result);
                    if failed && aborted_at.is_none() {
                        options.telemetry.emit(
                            events::PIPELINE_EXCEPTION,
                            &Measurements::default(),
                            &Metadata::new().with("task", name.clone()),
                        );
                        if !continue_on_error {
                            aborted_at = Some(name);
                        }
                    }
                }
                Err(_join_err) => {
                    options.telemetry.emit(
                        events::PIPELINE_EXCEPTION,
                        &Measurements::default(),
                        &Metadata::new().with("error", "task runner panicked"),
                    );
                    if !continue_on_error && aborted_at.is_none() {
                        aborted_at = Some("<unknown>".to_string());
                    }
                }
            }
        }

        if aborted_at.is_some() {
            break 'phases;
        }
    }

    dispatcher.shutdown().await;

    let tasks_run = task_results.len();
    let tasks_failed = task_results.iter().filter(|t| t.status == TaskStatus::Error).count();
    let tasks_succeeded = tasks_run - tasks_failed;
    let status = if tasks_failed == 0 { PipelineStatus::Ok } else { PipelineStatus::Error };

    options.telemetry.emit(
        events::PIPELINE_STOP,
        &Measurements { duration: Some(started.elapsed()), ..Default::default() },
        &Metadata::new().with("status", if tasks_failed == 0 { "ok" } else { "error" }),
    );

    Ok(PipelineResult {
        status,
        duration_ms: started.elapsed().as_millis() as u64,
        tasks_run,
        tasks_succeeded,
        tasks_failed,
        task_results,
        aborted_at,
    })
}

fn resolve_targets(config: &Config, target_tasks: &[String]) -> Result<(), SchedulerError> {
    let unknown: Vec<String> =
        target_tasks.iter().filter(|name| !config.tasks.contains_key(*name)).cloned().collect();
    if !unknown.is_empty() {
        return Err(SchedulerError::UnknownTasks(unknown));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Command, OnTarget, Task};

    fn local_task(name: &str, deps: &[&str]) -> Task {
        let mut task = Task::new(name, OnTarget::Local);
        task.deps = deps.iter().map(|s| s.to_string()).collect();
        task.commands.push(Command::new("true"));
        task
    }

    #[test]
    fn validate_rejects_unknown_target() {
        let config = Config::builder().task(local_task("a", &[])).build();
        let err = validate(&config, &["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTasks(_)));
    }

    #[test]
    fn dry_run_reports_phase_decomposition_of_induced_subgraph() {
        let config = Config::builder()
            .task(local_task("a", &[]))
            .task(local_task("b", &["a"]))
            .task(local_task("c", &[]))
            .build();

        let plan = dry_run(&config, &["b".to_string()]).unwrap();
        assert_eq!(plan.total_tasks, 2);
        assert_eq!(plan.phases, vec![vec!["a".to_string()], vec!["b".to_string()]]);
        assert_eq!(plan.task_details["b"].deps, vec!["a".to_string()]);
        assert_eq!(plan.task_details["a"].on, "local");
        assert!(!plan.task_details.contains_key("c"));
    }

    #[tokio::test]
    async fn run_executes_induced_subgraph_and_aggregates() {
        let config = Config::builder()
            .task(local_task("a", &[]))
            .task(local_task("b", &["a"]))
            .task(local_task("c", &[]))
            .build();

        let result = run(&config, &["b".to_string()], RunOptions::default()).await.unwrap();
        assert_eq!(result.status, PipelineStatus::Ok);
        assert_eq!(result.tasks_run, 2);
        assert_eq!(result.tasks_failed, 0);
        assert!(result.task_results.iter().all(|t| t.task != "c"));
    }

    #[tokio::test]
    async fn failing_task_aborts_remaining_phases_by_default() {
        let mut failing = local_task("a", &[]);
        failing.commands = vec![Command::new("exit 1")];
        let config = Config::builder().task(failing).task(local_task("b", &["a"])).build();

        let result = run(&config, &["b".to_string()], RunOptions::default()).await.unwrap();
        assert_eq!(result.status, PipelineStatus::Error);
        assert_eq!(result.aborted_at.as_deref(), Some("a"));
        assert!(result.task_results.iter().all(|t| t.task != "b"));
    }
}
