//! # Taxonomia de erros estruturados do motor de execução
//!
//! Todo erro que uma chamadora pode querer tratar especificamente (match)
//! ganha uma variante tipada aqui (via `thiserror`); erros que só são
//! exibidos, nunca tratados, ficam como `anyhow::Error` na borda da CLI.
//!
//! ## Para todos entenderem:
//!
//! Isto espelha a taxonomia por *categoria* do design (validação /
//! resolução / conexão / execução), não uma taxonomia por tipo Rust: um
//! `ConnectionError::Timeout` e um `ConnectionError::Transport` são
//! re-tentados de forma idêntica pelo command runner — só carregam
//! diagnósticos diferentes.
//!
//! Os códigos são agrupados por categoria, cada uma com sua faixa de
//! milhar, então o código sozinho já diz aproximadamente o que deu errado
//! antes mesmo de ler a mensagem.

use std::fmt;
use thiserror::Error;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Numbered error code with a category-by-first-digit scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // E1xxx: validation, caught before any execution starts.
    pub const UNKNOWN_TASK: Self = Self(1001);
    pub const UNKNOWN_DEPENDENCY: Self = Self(1002);
    pub const CIRCULAR_DEPENDENCY: Self = Self(1003);
    pub const UNKNOWN_HOST: Self = Self(1004);
    pub const UNKNOWN_GROUP_MEMBER: Self = Self(1005);
    pub const INVALID_OPTION: Self = Self(1006);

    // E2xxx: resolution, a task's `on:` target doesn't resolve.
    pub const NO_HOSTS_FOR_TASK: Self = Self(2001);

    // E3xxx: connection (SSH transport/auth/timeout).
    pub const CONNECTION_AUTH_FAILED: Self = Self(3001);
    pub const CONNECTION_TIMEOUT: Self = Self(3002);
    pub const CONNECTION_TRANSPORT: Self = Self(3003);
    pub const CONNECTION_REMOTE_SIGNAL: Self = Self(3004);

    // E4xxx: execution (local spawn, remote exit code, timeout).
    pub const LOCAL_SPAWN_FAILED: Self = Self(4001);
    pub const LOCAL_TIMEOUT: Self = Self(4002);
    pub const NON_ZERO_EXIT: Self = Self(4003);
    pub const CANCELLED: Self = Self(4004);

    // E5xxx: internal, should never surface in normal operation.
    pub const INTERNAL: Self = Self(5001);

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Validation,
            2 => ErrorCategory::Resolution,
            3 => ErrorCategory::Connection,
            4 => ErrorCategory::Execution,
            5 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Resolution,
    Connection,
    Execution,
    Internal,
    Unknown,
}

/// Validation errors raised before any execution is attempted: an unknown
/// task name, a dangling dependency, a cycle, an unresolvable host/group
/// reference, or an out-of-range option (`timeout_ms <= 0`, etc.).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("[{}] task '{name}' is not defined in this config", ErrorCode::UNKNOWN_TASK)]
    UnknownTask { name: String },

    #[error("[{}] task '{task}' depends on unknown task '{dep}'", ErrorCode::UNKNOWN_DEPENDENCY)]
    UnknownDependency { task: String, dep: String },

    #[error("[{}] task '{task}' targets unknown host or group '{on}'", ErrorCode::UNKNOWN_HOST)]
    UnknownTarget { task: String, on: String },

    #[error("[{}] group '{group}' references unknown host '{host}'", ErrorCode::UNKNOWN_GROUP_MEMBER)]
    UnknownGroupMember { group: String, host: String },

    #[error("[{}] {reason}", ErrorCode::INVALID_OPTION)]
    InvalidOption { reason: String },
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTask { .. } => ErrorCode::UNKNOWN_TASK,
            Self::UnknownDependency { .. } => ErrorCode::UNKNOWN_DEPENDENCY,
            Self::UnknownTarget { .. } => ErrorCode::UNKNOWN_HOST,
            Self::UnknownGroupMember { .. } => ErrorCode::UNKNOWN_GROUP_MEMBER,
            Self::InvalidOption { .. } => ErrorCode::INVALID_OPTION,
        }
    }
}

/// A concrete cycle witness: `[v0, v1, ..., vk]` with `vk == v0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleWitness(pub Vec<String>);

impl fmt::Display for CycleWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" -> "))
    }
}

/// Errors from building the task DAG.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("[{}] dependency cycle: {witness}", ErrorCode::CIRCULAR_DEPENDENCY)]
    Cycle { witness: CycleWitness },

    #[error("[{}] task '{task}' depends on unknown task '{dep}'", ErrorCode::UNKNOWN_DEPENDENCY)]
    UnknownDependency { task: String, dep: String },
}

/// Reasons an SSH connection attempt or exec can fail. Distinguished because
/// the command runner treats all of them as a retryable failure, but
/// telemetry and error reports want to know which one happened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("[{}] authentication to '{host}' failed: {detail}", ErrorCode::CONNECTION_AUTH_FAILED)]
    Auth { host: String, detail: String },

    #[error("[{}] connecting to '{host}' timed out after {timeout_ms}ms", ErrorCode::CONNECTION_TIMEOUT)]
    Timeout { host: String, timeout_ms: u64 },

    #[error("[{}] transport error talking to '{host}': {detail}", ErrorCode::CONNECTION_TRANSPORT)]
    Transport { host: String, detail: String },

    #[error("[{}] remote command on '{host}' was terminated by a signal: {detail}", ErrorCode::CONNECTION_REMOTE_SIGNAL)]
    RemoteSignal { host: String, detail: String },
}

impl ConnectionError {
    pub fn host(&self) -> &str {
        match self {
            Self::Auth { host, .. }
            | Self::Timeout { host, .. }
            | Self::Transport { host, .. }
            | Self::RemoteSignal { host, .. } => host,
        }
    }
}

/// Errors surfaced by running a single command (local or remote), before
/// retry accounting. A non-zero exit is *not* represented here — that's a
/// successful `exec` with `exit_code != 0`, handled by the command runner's
/// retry loop, not an `ExecError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("[{}] command timed out after {timeout_ms}ms", ErrorCode::LOCAL_TIMEOUT)]
    Timeout { timeout_ms: u64 },

    #[error("[{}] failed to spawn local command: {detail}", ErrorCode::LOCAL_SPAWN_FAILED)]
    Spawn { detail: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("[{}] execution cancelled", ErrorCode::CANCELLED)]
    Cancelled,
}

/// Top-level errors the pipeline scheduler can return before any task runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown target tasks: {0:?}")]
    UnknownTasks(Vec<String>),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("config is invalid: {0:?}")]
    InvalidConfig(Vec<ConfigError>),
}
