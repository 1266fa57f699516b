//! Per-host bounded pool of reusable SSH sessions.
//!
//! One pool per host, created lazily the first time that host is
//! referenced (design note §9: "pool shape"). `with_session` is the only
//! surface the rest of the crate sees — nobody outside this module touches
//! a raw `SshConnection`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::config::Host;
use crate::errors::{ConnectionError, ExecError};
use crate::exec::ExecOutput;
use crate::telemetry::{events, Measurements, Metadata, TelemetrySink};

use super::connection::SshConnection;

const IDLE_TTL: Duration = Duration::from_secs(120);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// One host's pool: a bounded set of idle sessions plus a semaphore
/// enforcing `max_connections` as a hard ceiling on concurrent sessions,
/// not just on the idle set's size.
pub struct SshPool {
    host: Host,
    connect_timeout: Duration,
    idle: Mutex<Vec<SshConnection>>,
    permits: Arc<Semaphore>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SshPool {
    fn new(
        host: Host,
        max_connections: usize,
        connect_timeout: Duration,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            host,
            connect_timeout,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_connections)),
            telemetry,
        });
        spawn_sweeper(Arc::clone(&pool));
        pool
    }

    /// Acquires a session (reusing an idle one if available, otherwise
    /// dialing a new one), passes it to `f`, and returns it to the idle set
    /// on every exit path — unless `f`'s outcome indicates the transport is
    /// tainted, in which case the session is closed instead of recycled.
    pub async fn with_session<F, Fut>(&self, f: F) -> Result<ExecOutput, ExecError>
    where
        F: FnOnce(SshConnection) -> Fut,
        Fut: Future<Output = (SshConnection, Result<ExecOutput, ExecError>)>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("pool semaphore never closed");
        self.telemetry.emit(
            events::SSH_POOL_CHECKOUT,
            &Measurements::default(),
            &Metadata::new().with("host", self.host.name.clone()),
        );

        let conn = {
            let mut idle = self.idle.lock().await;
            idle.pop()
        };
        let conn = match conn {
            Some(conn) if conn.is_alive() => conn,
            _ => SshConnection::connect(self.host.clone(), self.connect_timeout, self.telemetry.as_ref())
                .await
                .map_err(ExecError::from)?,
        };

        let (conn, result) = f(conn).await;

        if is_transport_tainted(&result) {
            drop(conn);
        } else {
            self.idle.lock().await.push(conn);
        }

        result
    }

    async fn sweep_idle(&self) {
        let mut idle = self.idle.lock().await;
        idle.retain_mut(|conn| {
            if conn.last_used.elapsed() > IDLE_TTL {
                conn.close();
                false
            } else {
                true
            }
        });
    }

    async fn close_all(&self) {
        let mut idle = self.idle.lock().await;
        for conn in idle.iter_mut() {
            conn.close();
        }
        idle.clear();
    }
}

fn is_transport_tainted(result: &Result<ExecOutput, ExecError>) -> bool {
    matches!(result, Err(ExecError::Connection(ConnectionError::Transport { .. })))
        || matches!(result, Err(ExecError::Connection(ConnectionError::Auth { .. })))
}

fn spawn_sweeper(pool: Arc<SshPool>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            if Arc::strong_count(&pool) == 1 {
                break;
            }
            pool.sweep_idle().await;
        }
    });
}

/// Owns every per-host pool, creating each lazily on first reference.
pub struct SshPoolRegistry {
    pools: RwLock<HashMap<String, Arc<SshPool>>>,
    max_connections: usize,
    connect_timeout: Duration,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SshPoolRegistry {
    pub fn new(max_connections: usize, connect_timeout_ms: u64, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            max_connections,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            telemetry,
        }
    }

    pub async fn with_session<F, Fut>(&self, host: &Host, f: F) -> Result<ExecOutput, ExecError>
    where
        F: FnOnce(SshConnection) -> Fut,
        Fut: Future<Output = (SshConnection, Result<ExecOutput, ExecError>)>,
    {
        let pool = self.pool_for(host).await;
        pool.with_session(f).await
    }

    async fn pool_for(&self, host: &Host) -> Arc<SshPool> {
        if let Some(pool) = self.pools.read().await.get(&host.name) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write().await;
        pools
            .entry(host.name.clone())
            .or_insert_with(|| {
                SshPool::new(
                    host.clone(),
                    self.max_connections,
                    self.connect_timeout,
                    Arc::clone(&self.telemetry),
                )
            })
            .clone()
    }

    /// Drains and tears down every pool. Called once at process end.
    pub async fn close_all(&self) {
        let pools = self.pools.read().await;
        for pool in pools.values() {
            pool.close_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tainted_transport_errors_are_not_recycled() {
        let err: Result<ExecOutput, ExecError> = Err(ExecError::Connection(ConnectionError::Transport {
            host: "h".into(),
            detail: "broken pipe".into(),
        }));
        assert!(is_transport_tainted(&err));
    }

    #[test]
    fn clean_results_are_recycled() {
        let ok: Result<ExecOutput, ExecError> =
            Ok(ExecOutput { combined_output: String::new(), exit_code: 0 });
        assert!(!is_transport_tainted(&ok));
    }
}
