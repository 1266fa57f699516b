//! Local executor: runs a shell command in a child process on this machine.
//!
//! Grounded on the teacher's async-executor shape (`executors::http`'s
//! `async_trait` methods wrapping a blocking-ish client call): a thin async
//! wrapper around `tokio::process::Command`, with `tokio::time::timeout`
//! providing the wall-clock bound the teacher gets from `reqwest`'s client
//! timeout for free.

use std::os::unix::process::CommandExt as _;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::errors::ExecError;

use super::{ExecOutput, OutputSink};

/// Runs commands through `/bin/sh -c`, merging stderr into stdout at the
/// shell level so redirections and pipes behave the way the DSL author
/// expects, exactly as they would typing the command at a terminal.
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, command: &str, timeout: Duration) -> Result<ExecOutput, ExecError> {
        let mut cmd = shell_command(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn { detail: e.to_string() })?;
        let pgid = child.id();

        let mut stdout = child.stdout.take().expect("piped stdout");
        let read_output = async {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).await.ok();
            buf
        };

        match tokio::time::timeout(timeout, async {
            let output = read_output.await;
            let status = child.wait().await;
            (output, status)
        })
        .await
        {
            Ok((combined_output, status)) => {
                let status = status.map_err(|e| ExecError::Spawn { detail: e.to_string() })?;
                Ok(ExecOutput {
                    combined_output,
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Err(_elapsed) => {
                kill_process_group(pgid);
                let _ = child.kill().await;
                Err(ExecError::Timeout { timeout_ms: timeout.as_millis() as u64 })
            }
        }
    }

    /// Streaming variant: delivers output chunks and a final exit event to
    /// `sink` as they arrive, instead of buffering the whole run.
    pub async fn run_streaming(
        &self,
        command: &str,
        timeout: Duration,
        sink: &dyn OutputSink,
    ) -> Result<i32, ExecError> {
        let mut cmd = shell_command(command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn { detail: e.to_string() })?;
        let pgid = child.id();
        let mut stdout = child.stdout.take().expect("piped stdout");

        let pump = async {
            let mut chunk = [0u8; 4096];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.on_chunk(&String::from_utf8_lossy(&chunk[..n])),
                    Err(_) => break,
                }
            }
            child.wait().await
        };

        match tokio::time::timeout(timeout, pump).await {
            Ok(status) => {
                let status = status.map_err(|e| ExecError::Spawn { detail: e.to_string() })?;
                let code = status.code().unwrap_or(-1);
                sink.on_exit(code);
                Ok(code)
            }
            Err(_elapsed) => {
                kill_process_group(pgid);
                let _ = child.kill().await;
                Err(ExecError::Timeout { timeout_ms: timeout.as_millis() as u64 })
            }
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(format!("{command} 2>&1"));
    // Puts the child in its own process group so a timeout can reach its
    // descendants too, not just the immediate shell.
    unsafe {
        cmd.pre_exec(|| {
            libc_setpgid();
            Ok(())
        });
    }
    cmd
}

// No `libc` dependency in this crate; `setpgid(0, 0)` is the one raw syscall
// a timeout-killed descendant tree needs, so it's made directly rather than
// pulling in a whole crate for it.
fn libc_setpgid() {
    extern "C" {
        fn setpgid(pid: i32, pgid: i32) -> i32;
    }
    unsafe {
        setpgid(0, 0);
    }
}

fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        extern "C" {
            fn kill(pid: i32, sig: i32) -> i32;
        }
        const SIGTERM: i32 = 15;
        unsafe {
            kill(-(pid as i32), SIGTERM);
        }
    }
}
