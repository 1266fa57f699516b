//! Command execution: the layer that actually runs a shell string somewhere,
//! either in a local child process or over a pooled SSH session.
//!
//! Everything above this module — the guard evaluator, the command runner —
//! talks only to `Dispatcher::exec`. Neither of them needs to know whether a
//! given host is `local` or reached over SSH; that decision is made once,
//! here, by matching on `HostTarget`.

pub mod local;
pub mod ssh;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, Host};
use crate::errors::{ConnectionError, ExecError};
use crate::telemetry::TelemetrySink;
use local::LocalExecutor;
use ssh::pool::SshPoolRegistry;

/// Where a command runs: the implicit local shell, or a named remote host.
/// Distinct from `config::OnTarget`, which names a task's target before
/// it's been expanded into a concrete host list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostTarget {
    Local,
    Remote(String),
}

impl HostTarget {
    pub fn label(&self) -> &str {
        match self {
            HostTarget::Local => "local",
            HostTarget::Remote(name) => name,
        }
    }
}

/// The outcome of running one command to completion (clean exit or
/// non-zero), as opposed to a transport/spawn failure, which is an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub combined_output: String,
    pub exit_code: i32,
}

/// A caller-supplied sink for the streaming variant of local execution.
/// Invoked on the executor's task; must not block indefinitely, per the
/// local executor's contract.
pub trait OutputSink: Send + Sync {
    fn on_chunk(&self, chunk: &str);
    fn on_exit(&self, exit_code: i32);
}

/// Routes a command to the local executor or the right per-host SSH pool.
/// The only surface the guard evaluator and command runner see — neither
/// touches `LocalExecutor` or `SshPoolRegistry` directly.
pub struct Dispatcher {
    local: LocalExecutor,
    ssh: SshPoolRegistry,
    hosts: HashMap<String, Host>,
}

impl Dispatcher {
    pub fn new(config: &Config, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            local: LocalExecutor::new(),
            ssh: SshPoolRegistry::new(
                config.defaults.max_connections,
                config.defaults.connect_timeout_ms,
                telemetry,
            ),
            hosts: config.hosts.clone(),
        }
    }

    pub async fn exec(
        &self,
        target: &HostTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError> {
        match target {
            HostTarget::Local => self.local.run(command, timeout).await,
            HostTarget::Remote(name) => {
                let host = self.hosts.get(name).ok_or_else(|| {
                    ExecError::Connection(ConnectionError::Transport {
                        host: name.clone(),
                        detail: format!("no host configuration found for '{name}'"),
                    })
                })?;
                self.ssh
                    .with_session(host, |mut conn| {
                        let command = command.to_string();
                        async move {
                            let result = conn.exec(&command, timeout).await;
                            (conn, result)
                        }
                    })
                    .await
            }
        }
    }

    /// Looks up a configured host by name, for callers (the command
    /// runner) that need the host's `become_method` without duplicating
    /// the dispatcher's copy of `Config::hosts`.
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Tears down every SSH pool. Called once at process end.
    pub async fn shutdown(&self) {
        self.ssh.close_all().await;
    }
}
