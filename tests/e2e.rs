//! End-to-end scenarios from the execution engine's testable-properties
//! list: literal inputs exercised through the crate's exposed API
//! (`validate`/`dry_run`/`run`) rather than through any one module in
//! isolation. Host-fan-out scenarios that the spec frames around remote
//! hosts are driven through [`nexus_core::strategy::schedule`] and
//! [`nexus_core::runner::run_command`] directly with a local-only stand-in,
//! since a real SSH server isn't available in CI — the same approach the
//! teacher takes for its own `#[tokio::test]`s that avoid a live dependency.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nexus_core::config::{Command, Config, HostGroup, OnTarget, Strategy, Task};
use nexus_core::exec::Dispatcher;
use nexus_core::facts::StaticFacts;
use nexus_core::runner::{run_command, CommandStatus};
use nexus_core::scheduler::{self, PipelineStatus, RunOptions};
use nexus_core::strategy::{self, HostResult, HostStatus};
use nexus_core::telemetry::NullTelemetrySink;

fn local_task(name: &str, deps: &[&str], shell: &str) -> Task {
    let mut task = Task::new(name, OnTarget::Local);
    task.deps = deps.iter().map(|s| s.to_string()).collect();
    task.commands.push(Command::new(shell));
    task
}

/// Scenario 1: diamond graph. A{}, B{A}, C{A}, D{B,C}, all local,
/// `echo ok` each. Target [D]: three phases, all four tasks ok.
#[tokio::test]
async fn diamond_graph_runs_all_four_tasks_in_three_phases() {
    let config = Config::builder()
        .task(local_task("A", &[], "echo ok"))
        .task(local_task("B", &["A"], "echo ok"))
        .task(local_task("C", &["A"], "echo ok"))
        .task(local_task("D", &["B", "C"], "echo ok"))
        .build();

    let plan = scheduler::dry_run(&config, &["D".to_string()]).unwrap();
    assert_eq!(plan.phases.len(), 3);
    assert_eq!(plan.phases[0], vec!["A".to_string()]);
    let phase_two: HashSet<_> = plan.phases[1].iter().cloned().collect();
    assert_eq!(phase_two, HashSet::from(["B".to_string(), "C".to_string()]));
    assert_eq!(plan.phases[2], vec!["D".to_string()]);

    let result = scheduler::run(&config, &["D".to_string()], RunOptions::default()).await.unwrap();
    assert_eq!(result.status, PipelineStatus::Ok);
    assert_eq!(result.tasks_run, 4);
    assert_eq!(result.tasks_succeeded, 4);
    assert_eq!(result.tasks_failed, 0);
    assert!(result.aborted_at.is_none());
}

/// Scenario 2: cycle detection. A{B}, B{A}; targeting [A] must fail
/// validation with a concrete witness and never attempt execution.
#[tokio::test]
async fn cyclic_tasks_are_rejected_before_any_execution() {
    let config = Config::builder()
        .task(local_task("A", &["B"], "echo ok"))
        .task(local_task("B", &["A"], "echo ok"))
        .build();

    let err = scheduler::validate(&config, &["A".to_string()]).unwrap_err();
    let witness = match &err {
        nexus_core::errors::SchedulerError::Graph(
            nexus_core::errors::GraphError::Cycle { witness },
        ) => witness.clone(),
        other => panic!("expected a cycle error, got {other:?}"),
    };
    assert_eq!(witness.0.first(), witness.0.last());

    let run_err = scheduler::run(&config, &["A".to_string()], RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        run_err,
        nexus_core::errors::SchedulerError::Graph(nexus_core::errors::GraphError::Cycle { .. })
    ));
}

/// Scenario 3: fail-fast within one phase. L1 (exit 1) and L2 (echo ok),
/// both local, no dependency between them — same phase. With
/// `continue_on_error=false` both still run (they're independent), but the
/// pipeline reports failure and would not start a hypothetical next phase.
#[tokio::test]
async fn independent_failure_in_one_phase_still_runs_its_sibling() {
    let config = Config::builder()
        .task(local_task("L1", &[], "exit 1"))
        .task(local_task("L2", &[], "echo ok"))
        .build();

    let result =
        scheduler::run(&config, &["L1".to_string(), "L2".to_string()], RunOptions::default())
            .await
            .unwrap();

    assert_eq!(result.status, PipelineStatus::Error);
    assert_eq!(result.tasks_run, 2);
    assert_eq!(result.tasks_succeeded, 1);
    assert_eq!(result.tasks_failed, 1);
    assert_eq!(result.aborted_at.as_deref(), Some("L1"));
    let l2 = result.task_results.iter().find(|t| t.task == "L2").unwrap();
    assert_eq!(l2.status, nexus_core::task::TaskStatus::Ok);
}

/// Scenario 4: rolling fan-out over 5 hosts with batch_size=2 yields
/// batches [[h0,h1],[h2,h3],[h4]]; a failure in the second batch (off
/// `continue_on_error`) marks the third batch's hosts `not_run`.
#[tokio::test]
async fn rolling_batches_five_hosts_and_stops_after_a_failing_batch() {
    let hosts: Vec<String> = (0..5).map(|i| format!("h{i}")).collect();
    let inflight = Arc::new(AtomicU32::new(0));
    let max_inflight = Arc::new(AtomicU32::new(0));

    let results = strategy::schedule(
        &hosts,
        Strategy::Rolling,
        2,
        false,
        {
            let inflight = Arc::clone(&inflight);
            let max_inflight = Arc::clone(&max_inflight);
            move |host| {
                let inflight = Arc::clone(&inflight);
                let max_inflight = Arc::clone(&max_inflight);
                async move {
                    let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inflight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    let status = if host == "h2" { HostStatus::Error } else { HostStatus::Ok };
                    HostResult::<()> { host, status, commands: vec![] }
                }
            }
        },
    )
    .await;

    assert_eq!(results.len(), 5);
    assert!(max_inflight.load(Ordering::SeqCst) <= 2, "batch_size=2 caps concurrency");

    let h2 = results.iter().find(|r| r.host == "h2").unwrap();
    assert_eq!(h2.status, HostStatus::Error);
    let h4 = results.iter().find(|r| r.host == "h4").unwrap();
    assert_eq!(h4.status, HostStatus::NotRun, "batch 3 never runs after batch 2 fails");
}

/// Scenario 5: a flaky command with retries=2, retry_delay_ms=10. A
/// simulated backend fails attempt 1 and succeeds on attempt 2. Expected:
/// `status=ok`, `attempts=2`.
#[tokio::test]
async fn flaky_command_succeeds_on_second_attempt() {
    // A real flaky remote backend isn't available in CI; exercise the same
    // retry loop against a local command whose exit code depends on a
    // counter file bumped by each invocation, so attempt 1 fails and
    // attempt 2 succeeds deterministically.
    let counter = tempfile::NamedTempFile::new().unwrap();
    let path = counter.path().to_string_lossy().to_string();

    let mut cmd = Command::new(format!(
        "COUNT=$(cat {path} 2>/dev/null || echo 0); echo $((COUNT+1)) > {path}; test \"$COUNT\" -ge 1"
    ));
    cmd.retries = 2;
    cmd.retry_delay_ms = 10;

    let config = Config::builder().build();
    let dispatcher = Dispatcher::new(&config, Arc::new(NullTelemetrySink));
    let facts_provider = StaticFacts::new();
    let telemetry = NullTelemetrySink;
    let cancel = tokio_util::sync::CancellationToken::new();
    let target = nexus_core::exec::HostTarget::Local;

    let result =
        run_command(&cmd, &target, None, &dispatcher, &facts_provider, &telemetry, &cancel).await;

    assert_eq!(result.status, CommandStatus::Ok);
    assert_eq!(result.attempts, 2);
}

/// Scenario 6: guard skip via `creates`. The path already exists on the
/// host, so the command is skipped without ever executing.
#[tokio::test]
async fn creates_guard_skips_when_path_already_exists() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.path().to_string_lossy().to_string();

    let mut cmd = Command::new(format!("touch {path}"));
    cmd.creates = Some(path.clone());

    let config = Config::builder().build();
    let dispatcher = Dispatcher::new(&config, Arc::new(NullTelemetrySink));
    let facts_provider = StaticFacts::new();
    let telemetry = NullTelemetrySink;
    let cancel = tokio_util::sync::CancellationToken::new();
    let target = nexus_core::exec::HostTarget::Local;

    let result = run_command(
        &cmd,
        &target,
        None,
        &dispatcher,
        &facts_provider,
        &telemetry,
        &cancel,
    )
    .await;

    assert_eq!(result.status, CommandStatus::Skipped);
    assert_eq!(result.attempts, 0);
    assert_eq!(result.duration_ms, 0);
    assert!(result.reason.unwrap().contains("creates"));
}

/// Scenario 7: dry-run fidelity. `dry_run` reports the same phase
/// decomposition `run` would execute, for any valid (config, targets),
/// without spawning a process.
#[tokio::test]
async fn dry_run_matches_the_phases_run_would_execute() {
    let config = Config::builder()
        .task(local_task("A", &[], "echo ok"))
        .task(local_task("B", &["A"], "echo ok"))
        .task(local_task("C", &[], "echo ok"))
        .build();

    let plan = scheduler::dry_run(&config, &["B".to_string()]).unwrap();
    assert_eq!(plan.total_tasks, 2);
    assert!(!plan.task_details.contains_key("C"), "C is unrelated to the target closure");

    let result = scheduler::run(&config, &["B".to_string()], RunOptions::default()).await.unwrap();
    let executed: HashSet<String> = result.task_results.iter().map(|t| t.task.clone()).collect();
    let planned: HashSet<String> = plan.phases.iter().flatten().cloned().collect();
    assert_eq!(executed, planned);
}

/// A task whose `on:` names a group resolves to the group's member hosts,
/// in declaration order, exercised through `Config::resolve_target` rather
/// than a live SSH connection.
#[tokio::test]
async fn group_target_resolves_to_member_hosts_in_order() {
    use nexus_core::config::Host;

    let config = Config::builder()
        .host(Host::new("web1", "10.0.0.1"))
        .host(Host::new("web2", "10.0.0.2"))
        .group(HostGroup { name: "web".into(), hosts: vec!["web1".into(), "web2".into()] })
        .task(Task::new("deploy", OnTarget::Named("web".into())))
        .build();

    let task = &config.tasks["deploy"];
    assert_eq!(config.resolve_target(task).unwrap(), vec!["web1", "web2"]);
}

/// A task-level `when` that is false skips the task entirely: no hosts are
/// touched and the task is reported `skipped`, not `error`.
#[tokio::test]
async fn task_level_when_false_skips_the_whole_task() {
    use nexus_core::guard::Predicate;

    let mut task = local_task("conditional", &[], "echo should-not-run");
    task.when = Predicate::Lit(serde_json::Value::Bool(false));
    let config = Config::builder().task(task).build();

    let result =
        scheduler::run(&config, &["conditional".to_string()], RunOptions::default()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Ok);
    let task_result = &result.task_results[0];
    assert_eq!(task_result.status, nexus_core::task::TaskStatus::Skipped);
    assert!(task_result.hosts.is_empty());
}
