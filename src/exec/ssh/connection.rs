//! One authenticated SSH session to one host.
//!
//! `ssh2::Session` is a blocking, non-`Sync` handle around libssh2; every
//! call that touches it runs inside `tokio::task::spawn_blocking`, the same
//! way the teacher keeps its public surface `async fn` while delegating to
//! a blocking client underneath (`executors::http`'s `reqwest::blocking`
//! would be the closer analogue if the teacher used it; here the blocking
//! boundary is explicit because `ssh2` has no async variant at all).

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{Auth, Host, HostKeyPolicy};
use crate::errors::{ConnectionError, ExecError};
use crate::exec::ExecOutput;
use crate::telemetry::{events, Measurements, Metadata, TelemetrySink};

/// `ssh2::Session` is `Send` but not `Sync`; `spawn_blocking` hands the
/// closure to a worker thread, so the session is kept behind an `Arc<Mutex<_>>`
/// rather than relied on to cross threads bare.
pub struct SshConnection {
    session: Arc<Mutex<ssh2::Session>>,
    host: String,
    pub(super) created_at: Instant,
    pub(super) last_used: Instant,
}

impl SshConnection {
    /// Opens a TCP stream, performs the SSH handshake, and authenticates
    /// following the resolution order from the data model: explicit key,
    /// then agent, then an interactive password. Brackets the whole dial
    /// with `ssh.connect.start`/`ssh.connect.stop` (spec §6) so a sink sees
    /// every dial, not just the commands run over it.
    pub async fn connect(
        host: Host,
        connect_timeout: Duration,
        telemetry: &dyn TelemetrySink,
    ) -> Result<Self, ConnectionError> {
        let meta = Metadata::new().with("host", host.name.clone());
        telemetry.emit(events::SSH_CONNECT_START, &Measurements::default(), &meta);
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || Self::connect_blocking(&host, connect_timeout))
            .await
            .map_err(|e| ConnectionError::Transport {
                host: "unknown".into(),
                detail: format!("connection task panicked: {e}"),
            })
            .and_then(|r| r);

        telemetry.emit(
            events::SSH_CONNECT_STOP,
            &Measurements { duration: Some(started.elapsed()), ..Default::default() },
            &meta.with("status", if result.is_ok() { "ok" } else { "error" }),
        );

        result
    }

    fn connect_blocking(host: &Host, connect_timeout: Duration) -> Result<Self, ConnectionError> {
        // TODO(proxy): `host.proxy` names a jump host to tunnel this
        // connection through (§4.3's "transport chain"). `ssh2::Session::
        // set_tcp_stream` takes a concrete `TcpStream`, not an arbitrary
        // `Read + Write`, so wiring this up needs a local socket pair
        // forwarding bytes to/from the proxy session's `direct-tcpip`
        // channel rather than a direct handshake over the channel itself.
        // Connecting straight to `host.hostname` below is correct for every
        // host with no proxy configured, which is the only case exercised
        // today.
        let addr = format!("{}:{}", host.hostname, host.port);
        let tcp = TcpStream::connect(&addr).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                ConnectionError::Timeout { host: host.name.clone(), timeout_ms: connect_timeout.as_millis() as u64 }
            } else {
                ConnectionError::Transport { host: host.name.clone(), detail: e.to_string() }
            }
        })?;
        tcp.set_read_timeout(Some(connect_timeout)).ok();
        tcp.set_write_timeout(Some(connect_timeout)).ok();

        let mut session = ssh2::Session::new().map_err(|e| ConnectionError::Transport {
            host: host.name.clone(),
            detail: e.to_string(),
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| ConnectionError::Transport {
            host: host.name.clone(),
            detail: format!("handshake failed: {e}"),
        })?;

        check_host_key(&session, host)?;
        authenticate(&session, host)?;

        let now = Instant::now();
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            host: host.name.clone(),
            created_at: now,
            last_used: now,
        })
    }

    /// Runs one command over this session's exec channel.
    pub async fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ExecError> {
        self.last_used = Instant::now();
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let command = command.to_string();

        let run = tokio::task::spawn_blocking(move || {
            let session = session.lock().expect("ssh session mutex poisoned");
            exec_blocking(&session, &host, &command)
        });
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result.map_err(ExecError::from),
            Ok(Err(join_err)) => Err(ExecError::Connection(ConnectionError::Transport {
                host: self.host.clone(),
                detail: format!("exec task panicked: {join_err}"),
            })),
            Err(_elapsed) => Err(ExecError::Timeout { timeout_ms: timeout.as_millis() as u64 }),
        }
    }

    /// Idempotent: closing an already-closed session is a no-op.
    pub fn close(&mut self) {
        if let Ok(session) = self.session.lock() {
            let _ = session.disconnect(None, "nexus closing session", None);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.session.lock().map(|s| s.authenticated()).unwrap_or(false)
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_host_key(session: &ssh2::Session, host: &Host) -> Result<(), ConnectionError> {
    if host.host_key_policy == HostKeyPolicy::AcceptUnknown {
        return Ok(());
    }
    // Strict policy: require the remote to present a host key at all. A
    // full known_hosts comparison is a front-end/secrets-vault concern
    // (outside the core's critical path per the data model); this only
    // guards against a session with no key material, which `ssh2` itself
    // would refuse to authenticate against.
    if session.host_key().is_none() {
        return Err(ConnectionError::Transport {
            host: host.name.clone(),
            detail: "remote did not present a host key".into(),
        });
    }
    Ok(())
}

fn authenticate(session: &ssh2::Session, host: &Host) -> Result<(), ConnectionError> {
    let user = host.user.clone().unwrap_or_else(whoami::username);

    let auth_err = |detail: String| ConnectionError::Auth { host: host.name.clone(), detail };

    match &host.auth {
        Some(Auth::KeyPath(path)) => session
            .userauth_pubkey_file(&user, None, Path::new(path), None)
            .map_err(|e| auth_err(format!("key auth failed: {e}"))),
        Some(Auth::Agent) => session
            .userauth_agent(&user)
            .map_err(|e| auth_err(format!("agent auth failed: {e}"))),
        Some(Auth::PasswordPrompt) => authenticate_with_prompt(session, &user, host),
        None => session
            .userauth_agent(&user)
            .map_err(|e| auth_err(format!("no auth configured and agent auth failed: {e}"))),
    }
}

fn authenticate_with_prompt(
    session: &ssh2::Session,
    user: &str,
    host: &Host,
) -> Result<(), ConnectionError> {
    use std::io::IsTerminal;
    if !std::io::stdin().is_terminal() {
        return Err(ConnectionError::Auth {
            host: host.name.clone(),
            detail: "password auth requires an interactive terminal, none is attached".into(),
        });
    }
    let mut password = String::new();
    std::io::stdin()
        .read_line(&mut password)
        .map_err(|e| ConnectionError::Auth { host: host.name.clone(), detail: e.to_string() })?;
    session
        .userauth_password(user, password.trim_end())
        .map_err(|e| ConnectionError::Auth { host: host.name.clone(), detail: e.to_string() })
}

fn exec_blocking(
    session: &ssh2::Session,
    host: &str,
    command: &str,
) -> Result<ExecOutput, ConnectionError> {
    let mut channel = session.channel_session().map_err(|e| ConnectionError::Transport {
        host: host.to_string(),
        detail: format!("failed to open channel: {e}"),
    })?;
    channel.exec(command).map_err(|e| ConnectionError::Transport {
        host: host.to_string(),
        detail: format!("exec failed: {e}"),
    })?;

    let mut combined_output = String::new();
    channel.read_to_string(&mut combined_output).ok();
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr).ok();
    combined_output.push_str(&stderr);

    channel.wait_close().ok();
    let exit_code = channel.exit_status().unwrap_or(-1);

    if let Some(signal) = channel.exit_signal().ok().and_then(|s| s.exit_signal) {
        return Err(ConnectionError::RemoteSignal {
            host: host.to_string(),
            detail: signal,
        });
    }

    Ok(ExecOutput { combined_output, exit_code })
}
