//! Host fan-out strategies: parallel, serial, rolling.
//!
//! Grounded on the teacher's `DagPlanner::execute` — a `Semaphore` bounds
//! concurrency and a `JoinSet` collects the batch. Serial and rolling are
//! not separate code paths here; they are the same bounded-batch loop with
//! the permit count set to 1 or `batch_size` (design note §9 — one shared
//! path rather than three near-duplicate ones). `batch_size` is a separate
//! argument rather than a `Strategy::Rolling` payload, since `Task::batch_size`
//! is this crate's one source of truth for it (see `config::Strategy`).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Strategy;

/// One host's outcome within a task's fan-out. `NotRun` covers spec
/// scenario 4: a rolling batch after the one that failed, when
/// `continue_on_error` is off, is recorded as not run rather than omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Ok,
    Error,
    NotRun,
}

/// Outcome of one host's run within a task, carrying whatever per-command
/// results the caller's `run_host` produced.
#[derive(Debug, Clone)]
pub struct HostResult<C> {
    pub host: String,
    pub status: HostStatus,
    pub commands: Vec<C>,
}

impl<C> HostResult<C> {
    pub fn failed(&self) -> bool {
        self.status == HostStatus::Error
    }
}

/// Runs `run_host` over every entry in `hosts` according to `strategy`,
/// stopping early when a host fails and `continue_on_error` is false. The
/// empty-host case (a task targeting `local`) is handled by the caller
/// passing a single synthetic host name. `batch_size` is only consulted
/// when `strategy` is `Rolling`; callers pass `Task::batch_size` for it.
pub async fn schedule<C, F, Fut>(
    hosts: &[String],
    strategy: Strategy,
    batch_size: usize,
    continue_on_error: bool,
    run_host: F,
) -> Vec<HostResult<C>>
where
    C: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HostResult<C>> + Send + 'static,
{
    let batch_size = match strategy {
        Strategy::Parallel => hosts.len().max(1),
        Strategy::Serial => 1,
        Strategy::Rolling => batch_size.max(1),
    };

    let semaphore = Arc::new(Semaphore::new(batch_size));
    let run_host = Arc::new(run_host);
    let mut results = Vec::with_capacity(hosts.len());
    let mut aborted = false;

    let chunks: Vec<&[String]> = hosts.chunks(batch_size).collect();
    for chunk in &chunks {
        if aborted {
            for host in *chunk {
                results.push(HostResult { host: host.clone(), status: HostStatus::NotRun, commands: vec![] });
            }
            continue;
        }

        let mut join_set = JoinSet::new();
        for host in *chunk {
            let permit = Arc::clone(&semaphore);
            let run_host = Arc::clone(&run_host);
            let host = host.clone();
            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                run_host(host).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    let failed = result.status == HostStatus::Error;
                    results.push(result);
                    if failed && !continue_on_error {
                        aborted = true;
                    }
                }
                Err(_join_err) => {
                    // A panicking host task counts as a failed host with no
                    // command results rather than propagating the panic.
                    if !continue_on_error {
                        aborted = true;
                    }
                }
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hosts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("host{i}")).collect()
    }

    #[tokio::test]
    async fn parallel_runs_every_host() {
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_inflight = Arc::new(AtomicUsize::new(0));
        let inflight2 = Arc::clone(&inflight);
        let max2 = Arc::clone(&max_inflight);

        let results = schedule(
            &hosts(5),
            Strategy::Parallel,
            1,
            true,
            move |host| {
                let inflight = Arc::clone(&inflight2);
                let max_inflight = Arc::clone(&max2);
                async move {
                    let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inflight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    HostResult::<()> { host, status: HostStatus::Ok, commands: vec![] }
                }
            },
        )
        .await;

        assert_eq!(results.len(), 5);
        assert!(max_inflight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn serial_runs_one_host_at_a_time() {
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_inflight = Arc::new(AtomicUsize::new(0));
        let inflight2 = Arc::clone(&inflight);
        let max2 = Arc::clone(&max_inflight);

        let results = schedule(
            &hosts(4),
            Strategy::Serial,
            1,
            true,
            move |host| {
                let inflight = Arc::clone(&inflight2);
                let max_inflight = Arc::clone(&max2);
                async move {
                    let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inflight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    HostResult::<()> { host, status: HostStatus::Ok, commands: vec![] }
                }
            },
        )
        .await;

        assert_eq!(results.len(), 4);
        assert_eq!(max_inflight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rolling_caps_concurrency_at_batch_size() {
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_inflight = Arc::new(AtomicUsize::new(0));
        let inflight2 = Arc::clone(&inflight);
        let max2 = Arc::clone(&max_inflight);

        let results = schedule(
            &hosts(6),
            Strategy::Rolling,
            2,
            true,
            move |host| {
                let inflight = Arc::clone(&inflight2);
                let max_inflight = Arc::clone(&max2);
                async move {
                    let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inflight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    HostResult::<()> { host, status: HostStatus::Ok, commands: vec![] }
                }
            },
        )
        .await;

        assert_eq!(results.len(), 6);
        assert!(max_inflight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn abort_on_error_stops_remaining_batches() {
        let results = schedule(
            &hosts(4),
            Strategy::Rolling,
            1,
            false,
            |host| async move {
                let status = if host == "host0" { HostStatus::Error } else { HostStatus::Ok };
                HostResult::<()> { host, status, commands: vec![] }
            },
        )
        .await;

        assert_eq!(results.len(), 4);
        assert!(results[0].failed());
        assert_eq!(
            results.iter().filter(|r| r.status == HostStatus::NotRun).count(),
            3,
            "batches after the failing one are recorded as not_run, not omitted"
        );
    }

    #[tokio::test]
    async fn continue_on_error_runs_all_hosts() {
        let results = schedule(
            &hosts(4),
            Strategy::Parallel,
            1,
            true,
            |host| async move {
                let status = if host == "host0" { HostStatus::Error } else { HostStatus::Ok };
                HostResult::<()> { host, status, commands: vec![] }
            },
        )
        .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|r| r.failed()).count(), 1);
    }
}
