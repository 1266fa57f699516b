//! Nexus: a distributed task runner. Given a `Config` (hosts, groups, and
//! dependency-ordered tasks of shell commands), resolves the task DAG and
//! runs it locally or over SSH, with per-command retries/timeouts/guards
//! and per-task host fan-out strategies.
//!
//! The three functions below are the whole exposed surface
//! (`validate`/`dry_run`/`run`); everything else in this crate is either a
//! supporting module or a seam meant to be implemented by a collaborator
//! (a DSL parser producing `Config`, a `FactsProvider`, a `TelemetrySink`).

pub mod config;
pub mod errors;
pub mod exec;
pub mod facts;
pub mod graph;
pub mod guard;
pub mod runner;
pub mod scheduler;
pub mod strategy;
pub mod task;
pub mod telemetry;

pub use config::Config;
pub use scheduler::{dry_run, run, validate, ExecutionPlan, PipelineResult, RunOptions};
