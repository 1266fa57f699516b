//! Command runner: drives one command on one host.
//!
//! guard → attempt loop (retry + exponential backoff + 20% jitter) →
//! timeout → `CommandResult`. Grounded directly on the teacher's
//! `execute_step_with_retry` (main.rs) and `retry::RetryExecutor` — both
//! already implement "attempt loop with exponential backoff and a strategy
//! enum"; this generalizes that to the spec's fixed retry-budget-with-
//! jitter model (the teacher's version has no jitter and a freeform
//! strategy string; here the strategy isn't pluggable, so the loop is a
//! plain function rather than a struct carrying a parsed strategy enum).

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::{BecomeMethod, Command, Host};
use crate::errors::ExecError;
use crate::exec::{Dispatcher, HostTarget};
use crate::facts::FactsProvider;
use crate::guard::{self, Facts, SkipReason};
use crate::telemetry::{events, Measurements, Metadata, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Error,
    Skipped,
}

/// The result of running one command on one host. An append-only record
/// per the data model's invariant 5 — nothing mutates a `CommandResult`
/// after the runner returns it.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub output: String,
    pub exit_code: Option<i32>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub reason: Option<String>,
}

impl CommandResult {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            status: CommandStatus::Skipped,
            output: String::new(),
            exit_code: None,
            attempts: 0,
            duration_ms: 0,
            reason: Some(reason.to_string()),
        }
    }

    fn cancelled() -> Self {
        Self {
            status: CommandStatus::Error,
            output: String::new(),
            exit_code: None,
            attempts: 0,
            duration_ms: 0,
            reason: Some(ExecError::Cancelled.to_string()),
        }
    }
}

/// Drives guard evaluation and the retry loop for one `(command, host)`
/// pair. Never escalates an exception — every exit path returns a
/// `CommandResult`.
pub async fn run_command(
    command: &Command,
    target: &HostTarget,
    host: Option<&Host>,
    dispatcher: &Dispatcher,
    facts_provider: &dyn FactsProvider,
    telemetry: &dyn TelemetrySink,
    cancel: &tokio_util::sync::CancellationToken,
) -> CommandResult {
    let facts: Facts = match host {
        Some(h) => facts_provider.facts(h).await,
        None => Facts::new(),
    };

    let meta = Metadata::new()
        .with("host", target.label())
        .with("command", preview(&command.shell));

    if let Some(reason) = guard::evaluate(command, target, &facts, dispatcher).await {
        telemetry.emit(events::COMMAND_START, &Measurements::default(), &meta);
        telemetry.emit(
            events::COMMAND_STOP,
            &Measurements { attempt: Some(0), ..Default::default() },
            &meta.clone().with("status", "skipped"),
        );
        return CommandResult::skipped(reason);
    }

    telemetry.emit(events::COMMAND_START, &Measurements::default(), &meta);

    let max_attempts = command.max_attempts();
    let mut attempt = 1u32;
    let started = Instant::now();
    let wrapped = wrap_privilege_escalation(command, host);

    loop {
        if cancel.is_cancelled() {
            let result = CommandResult::cancelled();
            telemetry.emit(
                events::COMMAND_STOP,
                &Measurements { attempt: Some(attempt), ..Default::default() },
                &meta.clone().with("status", "cancelled"),
            );
            return result;
        }

        let timeout = Duration::from_millis(command.timeout_ms);
        let outcome = tokio::select! {
            outcome = dispatcher.exec(target, &wrapped, timeout) => outcome,
            _ = cancel.cancelled() => {
                let result = CommandResult::cancelled();
                telemetry.emit(
                    events::COMMAND_STOP,
                    &Measurements { attempt: Some(attempt), ..Default::default() },
                    &meta.clone().with("status", "cancelled"),
                );
                return result;
            }
        };

        match outcome {
            Ok(output) if output.exit_code == 0 => {
                let result = CommandResult {
                    status: CommandStatus::Ok,
                    output: output.combined_output,
                    exit_code: Some(0),
                    attempts: attempt,
                    duration_ms: started.elapsed().as_millis() as u64,
                    reason: None,
                };
                telemetry.emit(
                    events::COMMAND_STOP,
                    &Measurements {
                        attempt: Some(attempt),
                        exit_code: Some(0),
                        duration: Some(started.elapsed()),
                        ..Default::default()
                    },
                    &meta.clone().with("status", "ok"),
                );
                return result;
            }
            Ok(output) => {
                if attempt == max_attempts {
                    let result = CommandResult {
                        status: CommandStatus::Error,
                        output: output.combined_output,
                        exit_code: Some(output.exit_code),
                        attempts: attempt,
                        duration_ms: started.elapsed().as_millis() as u64,
                        reason: Some(format!("exit code {}", output.exit_code)),
                    };
                    telemetry.emit(
                        events::COMMAND_STOP,
                        &Measurements {
                            attempt: Some(attempt),
                            exit_code: Some(output.exit_code),
                            duration: Some(started.elapsed()),
                            ..Default::default()
                        },
                        &meta.clone().with("status", "error"),
                    );
                    return result;
                }
                let delay = backoff_delay(command.retry_delay_ms, attempt);
                telemetry.emit(
                    events::COMMAND_RETRY,
                    &Measurements {
                        attempt: Some(attempt),
                        delay_ms: Some(delay.as_millis() as u64),
                        exit_code: Some(output.exit_code),
                        ..Default::default()
                    },
                    &meta,
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        let result = CommandResult::cancelled();
                        telemetry.emit(
                            events::COMMAND_STOP,
                            &Measurements { attempt: Some(attempt), ..Default::default() },
                            &meta.clone().with("status", "cancelled"),
                        );
                        return result;
                    }
                }
                attempt += 1;
            }
            Err(err) => {
                if attempt == max_attempts {
                    let result = error_result(&err, attempt, started.elapsed());
                    telemetry.emit(
                        events::COMMAND_STOP,
                        &Measurements {
                            attempt: Some(attempt),
                            duration: Some(started.elapsed()),
                            ..Default::default()
                        },
                        &meta.clone().with("status", "error"),
                    );
                    return result;
                }
                let delay = backoff_delay(command.retry_delay_ms, attempt);
                telemetry.emit(
                    events::COMMAND_RETRY,
                    &Measurements {
                        attempt: Some(attempt),
                        delay_ms: Some(delay.as_millis() as u64),
                        ..Default::default()
                    },
                    &meta.clone().with("error", err.to_string()),
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn error_result(err: &ExecError, attempts: u32, elapsed: Duration) -> CommandResult {
    CommandResult {
        status: CommandStatus::Error,
        output: String::new(),
        exit_code: None,
        attempts,
        duration_ms: elapsed.as_millis() as u64,
        reason: Some(err.to_string()),
    }
}

/// `delay = retry_delay_ms * 2^(attempt-1)`, multiplied by a random factor
/// in `[0.8, 1.2]` — 20% jitter, same base-delay accounting as the
/// teacher's backoff but with jitter added, since the teacher's own
/// version has none.
fn backoff_delay(retry_delay_ms: u64, attempt: u32) -> Duration {
    let base = retry_delay_ms as f64 * 2f64.powi((attempt - 1) as i32);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base * jitter) as u64)
}

/// Wraps the shell under the host's `become_method` when `sudo` is set, or
/// under `sudo -u user` when a run-as user is requested. Local targets have
/// no `Host` record, so `sudo` there defaults to the `sudo` method.
fn wrap_privilege_escalation(command: &Command, host: Option<&Host>) -> String {
    if let Some(user) = &command.user {
        return format!("sudo -u {} {}", shell_escape::escape(user.into()), command.shell);
    }
    if command.sudo {
        let method = host.and_then(|h| h.become_method.clone()).unwrap_or(BecomeMethod::Sudo);
        return match method {
            BecomeMethod::Sudo => format!("sudo -n {}", command.shell),
            BecomeMethod::Su => {
                format!("su -c {}", shell_escape::escape((&command.shell).into()))
            }
            BecomeMethod::Doas => format!("doas {}", command.shell),
        };
    }
    command.shell.clone()
}

fn preview(shell: &str) -> String {
    const MAX: usize = 80;
    if shell.len() <= MAX {
        shell.to_string()
    } else {
        format!("{}...", &shell[..MAX])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Command;

    #[test]
    fn backoff_delay_respects_jitter_bounds() {
        for attempt in 1..=4 {
            let delay = backoff_delay(1000, attempt).as_millis() as f64;
            let base = 1000.0 * 2f64.powi((attempt - 1) as i32);
            assert!(delay >= base * 0.8 - 1.0);
            assert!(delay <= base * 1.2 + 1.0);
        }
    }

    #[test]
    fn sudo_wraps_with_sudo_n_by_default() {
        let mut cmd = Command::new("apt-get update");
        cmd.sudo = true;
        assert_eq!(wrap_privilege_escalation(&cmd, None), "sudo -n apt-get update");
    }

    #[test]
    fn run_as_user_wraps_with_sudo_dash_u() {
        let mut cmd = Command::new("whoami");
        cmd.user = Some("deploy".to_string());
        assert_eq!(wrap_privilege_escalation(&cmd, None), "sudo -u deploy whoami");
    }

    #[test]
    fn plain_command_is_unwrapped() {
        let cmd = Command::new("echo hi");
        assert_eq!(wrap_privilege_escalation(&cmd, None), "echo hi");
    }
}
