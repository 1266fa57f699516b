//! Task runner: resolves a task's targets, evaluates its `when` guard, fans
//! out over hosts via [`crate::strategy`], and aggregates into a
//! `TaskResult`. Never raises — a task that can't even resolve its targets
//! still returns a result, with every host marked failed.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, OnTarget, Task};
use crate::exec::{Dispatcher, HostTarget};
use crate::facts::FactsProvider;
use crate::guard::Facts;
use crate::runner::{run_command, CommandResult, CommandStatus};
use crate::strategy::{self, HostResult, HostStatus};
use crate::telemetry::{events, Measurements, Metadata, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task: String,
    pub status: TaskStatus,
    pub hosts: Vec<HostResult<CommandResult>>,
    pub duration_ms: u64,
}

/// Runs every command of `task` against its resolved hosts.
///
/// `dispatcher`, `facts_provider`, and `telemetry` are shared across every
/// task in a pipeline run; `cancel` lets the scheduler abort an in-flight
/// task without the task runner knowing why. `continue_on_error` is the
/// caller's already-resolved value (`RunOptions.continue_on_error` falling
/// back to `config.defaults.continue_on_error`) — this function never reads
/// `config.defaults` itself, so a per-run override always takes effect.
#[allow(clippy::too_many_arguments)]
pub async fn run_task(
    config: &Config,
    task: &Task,
    dispatcher: Arc<Dispatcher>,
    facts_provider: Arc<dyn FactsProvider>,
    telemetry: Arc<dyn TelemetrySink>,
    cancel: tokio_util::sync::CancellationToken,
    continue_on_error: bool,
) -> TaskResult {
    let started = Instant::now();
    let meta = Metadata::new().with("task", task.name.clone());
    telemetry.emit(events::TASK_START, &Measurements::default(), &meta);

    if !task.when.eval_bool(&Facts::new()) {
        telemetry.emit(
            events::TASK_STOP,
            &Measurements::default(),
            &meta.clone().with("status", "skipped"),
        );
        return TaskResult {
            task: task.name.clone(),
            status: TaskStatus::Skipped,
            hosts: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
    }

    let targets = match config.resolve_target(task) {
        Ok(targets) => targets,
        Err(err) => {
            telemetry.emit(
                events::TASK_EXCEPTION,
                &Measurements::default(),
                &meta.clone().with("error", err.to_string()),
            );
            telemetry.emit(
                events::TASK_STOP,
                &Measurements::default(),
                &meta.clone().with("status", "error"),
            );
            return TaskResult {
                task: task.name.clone(),
                status: TaskStatus::Error,
                hosts: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }
    };

    let host_names: Vec<String> = if matches!(task.on, OnTarget::Local) {
        vec!["local".to_string()]
    } else {
        targets
    };

    let commands = Arc::new(task.commands.clone());
    let on_local = matches!(task.on, OnTarget::Local);

    let results = strategy::schedule(
        &host_names,
        task.strategy,
        task.batch_size,
        continue_on_error,
        move |host_name| {
            let commands = Arc::clone(&commands);
            let dispatcher = Arc::clone(&dispatcher);
            let facts_provider = Arc::clone(&facts_provider);
            let telemetry = Arc::clone(&telemetry);
            let cancel = cancel.clone();
            async move {
                run_host_commands(
                    host_name,
                    on_local,
                    &commands,
                    &dispatcher,
                    facts_provider.as_ref(),
                    telemetry.as_ref(),
                    &cancel,
                    continue_on_error,
                )
                .await
            }
        },
    )
    .await;

    let any_failed = results.iter().any(|r| r.failed());
    let status = if any_failed { TaskStatus::Error } else { TaskStatus::Ok };

    telemetry.emit(
        events::TASK_STOP,
        &Measurements { duration: Some(started.elapsed()), ..Default::default() },
        &meta.clone().with("status", if any_failed { "error" } else { "ok" }),
    );

    TaskResult {
        task: task.name.clone(),
        status,
        hosts: results,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_host_commands(
    host_name: String,
    on_local: bool,
    commands: &[crate::config::Command],
    dispatcher: &Dispatcher,
    facts_provider: &dyn FactsProvider,
    telemetry: &dyn TelemetrySink,
    cancel: &tokio_util::sync::CancellationToken,
    continue_on_error: bool,
) -> HostResult<CommandResult> {
    let target = if on_local { HostTarget::Local } else { HostTarget::Remote(host_name.clone()) };
    let host = if on_local { None } else { dispatcher.host(&host_name) };

    let mut command_results = Vec::with_capacity(commands.len());
    let mut failed = false;

    for command in commands {
        if cancel.is_cancelled() {
            break;
        }
        let result =
            run_command(command, &target, host, dispatcher, facts_provider, telemetry, cancel)
                .await;
        if result.status == CommandStatus::Error {
            failed = true;
        }
        command_results.push(result);
        if failed && !continue_on_error {
            break;
        }
    }

    let status = if failed { HostStatus::Error } else { HostStatus::Ok };
    HostResult { host: host_name, status, commands: command_results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Command, OnTarget};
    use crate::facts::StaticFacts;
    use crate::telemetry::NullTelemetrySink;

    fn local_task(name: &str, shell: &str) -> Task {
        let mut task = Task::new(name, OnTarget::Local);
        task.commands.push(Command::new(shell));
        task
    }

    #[tokio::test]
    async fn local_task_runs_its_commands() {
        let config = Config::builder().task(local_task("greet", "echo hi")).build();
        let task = &config.tasks["greet"];
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(NullTelemetrySink);
        let dispatcher = Arc::new(Dispatcher::new(&config, Arc::clone(&telemetry)));
        let facts: Arc<dyn FactsProvider> = Arc::new(StaticFacts::new());

        let result = run_task(
            &config,
            task,
            dispatcher,
            facts,
            telemetry,
            tokio_util::sync::CancellationToken::new(),
            config.defaults.continue_on_error,
        )
        .await;

        assert_eq!(result.status, TaskStatus::Ok);
        assert_eq!(result.hosts.len(), 1);
        assert_eq!(result.hosts[0].commands[0].status, CommandStatus::Ok);
    }

    #[tokio::test]
    async fn unresolvable_target_yields_error_status() {
        let config = Config::builder()
            .task(Task::new("deploy", OnTarget::Named("ghost".into())))
            .build();
        let task = &config.tasks["deploy"];
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(NullTelemetrySink);
        let dispatcher = Arc::new(Dispatcher::new(&config, Arc::clone(&telemetry)));
        let facts: Arc<dyn FactsProvider> = Arc::new(StaticFacts::new());

        let result = run_task(
            &config,
            task,
            dispatcher,
            facts,
            telemetry,
            tokio_util::sync::CancellationToken::new(),
            config.defaults.continue_on_error,
        )
        .await;

        assert_eq!(result.status, TaskStatus::Error);
        assert!(result.hosts.is_empty());
    }
}
