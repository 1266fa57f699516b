//! Telemetry sink: injected, not global (design note §9). The core hands
//! every emitted event to a caller-supplied `TelemetrySink`; it never
//! attaches to a process-wide subscriber itself, since that "couples tests
//! to each other and is a trap."
//!
//! A default `TracingTelemetrySink` adapts events onto `tracing`, the
//! teacher's own logging backbone (`tracing` + `tracing-subscriber` with
//! `EnvFilter`, `#[instrument]` on `DagPlanner::execute`). Wiring the
//! teacher's OTEL pipeline (`tracing-opentelemetry` + `opentelemetry-otlp`)
//! on top of that is a CLI concern, not something this sink initializes.

use std::collections::HashMap;
use std::time::Duration;

use tracing::info;

/// Event tags from the schema in §6. Grouped as consts rather than an enum
/// so a sink can match on the string it actually receives without this
/// crate forcing its own enum across a trait boundary.
pub mod events {
    pub const PIPELINE_START: &str = "pipeline.start";
    pub const PIPELINE_STOP: &str = "pipeline.stop";
    pub const PIPELINE_EXCEPTION: &str = "pipeline.exception";
    pub const TASK_START: &str = "task.start";
    pub const TASK_STOP: &str = "task.stop";
    pub const TASK_EXCEPTION: &str = "task.exception";
    pub const COMMAND_START: &str = "command.start";
    pub const COMMAND_STOP: &str = "command.stop";
    pub const COMMAND_RETRY: &str = "command.retry";
    pub const SSH_CONNECT_START: &str = "ssh.connect.start";
    pub const SSH_CONNECT_STOP: &str = "ssh.connect.stop";
    pub const SSH_POOL_CHECKOUT: &str = "ssh.pool.checkout";
}

/// Numeric measurements carried by an event: `system_time`/`duration` in
/// native units, plus counters like `attempt`/`delay_ms`.
#[derive(Debug, Clone, Default)]
pub struct Measurements {
    pub duration: Option<Duration>,
    pub attempt: Option<u32>,
    pub delay_ms: Option<u64>,
    pub exit_code: Option<i32>,
}

/// String-keyed identifiers relevant to the span: task name, host name,
/// command preview, and anything else a sink wants to record.
#[derive(Debug, Clone, Default)]
pub struct Metadata(pub HashMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }
}

/// A callable invoked with `(event_name, measurements, metadata)` for each
/// emitted event. The core neither persists nor ships events itself.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &str, measurements: &Measurements, metadata: &Metadata);
}

/// Adapts emitted events onto `tracing::info!` spans. The default sink used
/// when a caller doesn't supply one of its own.
#[derive(Debug, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: &str, measurements: &Measurements, metadata: &Metadata) {
        info!(
            event = event,
            duration_ms = measurements.duration.map(|d| d.as_millis() as u64),
            attempt = measurements.attempt,
            delay_ms = measurements.delay_ms,
            exit_code = measurements.exit_code,
            metadata = ?metadata.0,
            "telemetry event"
        );
    }
}

/// Discards every event. Useful in tests that don't care about telemetry.
#[derive(Debug, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: &str, _measurements: &Measurements, _metadata: &Metadata) {}
}
