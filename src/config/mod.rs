//! Data model: `Host`, `HostGroup`, `Command`, `Task`, `Config`.
//!
//! Everything here is a pure, immutable value once a `Config` is built — no
//! direct pointers between records, only names (`HashMap<String, _>` keyed
//! by name). That's deliberate: it keeps construction and serialization
//! simple and makes the induced-subgraph queries in `graph` a plain filter
//! over names rather than a pointer walk.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::guard::Predicate;

/// How a command should escalate privileges on the remote (or local) host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BecomeMethod {
    Sudo,
    Su,
    Doas,
}

/// Where a host's authentication material comes from, in the order the
/// connection attempts them (§4.3): explicit key, then agent, then an
/// interactive password (only if a TTY is attached).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Auth {
    KeyPath(String),
    Agent,
    PasswordPrompt,
}

/// Host-key acceptance policy for a connection. Strict by default; accepting
/// unknown keys is an explicit opt-in, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    #[default]
    Strict,
    AcceptUnknown,
}

/// One remote (or the implicit local) machine. Immutable once produced by
/// the config front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub hostname: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: Option<Auth>,
    /// Name of another host to tunnel through, if any.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub become_: bool,
    #[serde(default)]
    pub become_user: Option<String>,
    #[serde(default)]
    pub become_method: Option<BecomeMethod>,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

fn default_port() -> u16 {
    22
}

impl Host {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            user: None,
            port: default_port(),
            auth: None,
            proxy: None,
            become_: false,
            become_user: None,
            become_method: None,
            host_key_policy: HostKeyPolicy::Strict,
        }
    }
}

/// A named, ordered set of hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<String>,
}

/// A single shell command plus its retry/timeout/guard options. A `Command`
/// is a pure value — running it has no effect on the `Command` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub shell: String,
    #[serde(default)]
    pub sudo: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "Predicate::always_true")]
    pub when: Predicate,
    #[serde(default)]
    pub unless: Option<String>,
    #[serde(default)]
    pub onlyif: Option<String>,
    #[serde(default)]
    pub creates: Option<String>,
    #[serde(default)]
    pub removes: Option<String>,
}

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_SSH_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
pub const DEFAULT_PARALLEL_LIMIT: usize = 10;

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Command {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            sudo: false,
            user: None,
            timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            retries: 0,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            when: Predicate::always_true(),
            unless: None,
            onlyif: None,
            creates: None,
            removes: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Where a task's commands run: the implicit local shell, a single named
/// host, or a named group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnTarget {
    Local,
    Named(String),
}

impl From<&str> for OnTarget {
    fn from(s: &str) -> Self {
        if s == "local" {
            OnTarget::Local
        } else {
            OnTarget::Named(s.to_string())
        }
    }
}

/// A task's host fan-out strategy. `Rolling`'s batch size lives on `Task`
/// itself (`Task::batch_size`), not here — a single source of truth, so a
/// config can't set two different batch sizes that disagree with each
/// other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Parallel,
    Serial,
    Rolling,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Parallel
    }
}

/// One node in the task graph: a name, its dependencies, where it runs, and
/// the ordered commands to run there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub deps: HashSet<String>,
    pub on: OnTarget,
    pub commands: Vec<Command>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_task_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default = "Predicate::always_true")]
    pub when: Predicate,
}

fn default_batch_size() -> usize {
    1
}

fn default_task_timeout_ms() -> u64 {
    DEFAULT_TASK_TIMEOUT_MS
}

impl Task {
    pub fn new(name: impl Into<String>, on: OnTarget) -> Self {
        Self {
            name: name.into(),
            deps: HashSet::new(),
            on,
            commands: Vec::new(),
            strategy: Strategy::default(),
            batch_size: default_batch_size(),
            timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            tags: HashSet::new(),
            when: Predicate::always_true(),
        }
    }
}

/// Global defaults applied when a task or command doesn't override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_SSH_CONNECT_TIMEOUT_MS
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_parallel_limit() -> usize {
    DEFAULT_PARALLEL_LIMIT
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            connect_timeout_ms: DEFAULT_SSH_CONNECT_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            parallel_limit: DEFAULT_PARALLEL_LIMIT,
        }
    }
}

/// The whole world the execution engine is given: hosts, groups, tasks, and
/// defaults. Constructed once per run and read-only from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: HashMap<String, Host>,
    #[serde(default)]
    pub groups: HashMap<String, HostGroup>,
    pub tasks: HashMap<String, Task>,
    #[serde(default)]
    pub defaults: Defaults,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolves `on:` to a flat, ordered list of host names ("local" is
    /// represented by an empty list at this layer — callers distinguish it
    /// via `OnTarget::Local` directly).
    pub fn resolve_target(&self, task: &Task) -> Result<Vec<String>, ConfigError> {
        match &task.on {
            OnTarget::Local => Ok(Vec::new()),
            OnTarget::Named(name) => {
                if let Some(host) = self.hosts.get(name) {
                    Ok(vec![host.name.clone()])
                } else if let Some(group) = self.groups.get(name) {
                    Ok(group.hosts.clone())
                } else {
                    Err(ConfigError::UnknownTarget {
                        task: task.name.clone(),
                        on: name.clone(),
                    })
                }
            }
        }
    }

    /// Structural invariants (1, 2, 4 from the data model): every dep names
    /// a real task, every `on:` resolves, every group member is a known
    /// host, every numeric option is in range. Acyclicity (invariant 3) is
    /// checked separately by `graph::build`, since it needs the full edge
    /// set rather than a per-task check.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        for group in self.groups.values() {
            for host in &group.hosts {
                if !self.hosts.contains_key(host) {
                    errors.push(ConfigError::UnknownGroupMember {
                        group: group.name.clone(),
                        host: host.clone(),
                    });
                }
            }
        }

        for task in self.tasks.values() {
            for dep in &task.deps {
                if !self.tasks.contains_key(dep) {
                    errors.push(ConfigError::UnknownDependency {
                        task: task.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }

            if let Err(e) = self.resolve_target(task) {
                errors.push(e);
            }

            if task.batch_size == 0 {
                errors.push(ConfigError::InvalidOption {
                    reason: format!("task '{}' has batch_size 0, must be >= 1", task.name),
                });
            }
            if task.timeout_ms == 0 {
                errors.push(ConfigError::InvalidOption {
                    reason: format!("task '{}' has timeout_ms 0, must be > 0", task.name),
                });
            }

            for cmd in &task.commands {
                if cmd.timeout_ms == 0 {
                    errors.push(ConfigError::InvalidOption {
                        reason: format!("command '{}' has timeout_ms 0, must be > 0", cmd.shell),
                    });
                }
                if cmd.retry_delay_ms == 0 {
                    errors.push(ConfigError::InvalidOption {
                        reason: format!(
                            "command '{}' has retry_delay_ms 0, must be > 0",
                            cmd.shell
                        ),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Ergonomic construction for tests and embedding callers, mirroring how
/// fixture helpers build up values incrementally instead of one long struct
/// literal.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    hosts: HashMap<String, Host>,
    groups: HashMap<String, HostGroup>,
    tasks: HashMap<String, Task>,
    defaults: Defaults,
}

impl ConfigBuilder {
    pub fn host(mut self, host: Host) -> Self {
        self.hosts.insert(host.name.clone(), host);
        self
    }

    pub fn group(mut self, group: HostGroup) -> Self {
        self.groups.insert(group.name.clone(), group);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.insert(task.name.clone(), task);
        self
    }

    pub fn defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn build(self) -> Config {
        Config {
            hosts: self.hosts,
            groups: self.groups,
            tasks: self.tasks,
            defaults: self.defaults,
        }
    }
}
