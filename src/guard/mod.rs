//! Guard evaluation: decide *run* or *skip* for one (command, host) pair,
//! before the first attempt.
//!
//! Two different things live here and are kept apart on purpose (design
//! note: guards as pure predicates, probes as effects):
//!
//! - `Predicate`, the `when` clause's AST. Pure: it only reads a facts map,
//!   never touches the network or filesystem, and is cheap to unit test in
//!   isolation.
//! - `evaluate`, which additionally runs the effectful probes (`creates`,
//!   `removes`, `onlyif`, `unless`) over a `Dispatcher`, since those need to
//!   reach the target host the same way the command itself will.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Command;
use crate::exec::{Dispatcher, HostTarget};

pub type Facts = HashMap<String, Value>;

/// Comparison operators available inside a `when` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The `when` clause's predicate AST: literals, fact references, comparison
/// and boolean operators, and `in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Lit(Value),
    Fact(String),
    Cmp { op: CmpOp, lhs: Box<Predicate>, rhs: Box<Predicate> },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    In { needle: Box<Predicate>, haystack: Box<Predicate> },
}

impl Predicate {
    pub fn always_true() -> Self {
        Predicate::Lit(Value::Bool(true))
    }

    /// Evaluates to a raw JSON value: literals and fact references resolve
    /// directly; a missing fact resolves to `Value::Null` (the spec's
    /// "nil-like value"), never an error.
    fn eval_value(&self, facts: &Facts) -> Value {
        match self {
            Predicate::Lit(v) => v.clone(),
            Predicate::Fact(name) => facts.get(name).cloned().unwrap_or(Value::Null),
            other => Value::Bool(other.eval_bool(facts)),
        }
    }

    /// Evaluates to a boolean. Comparisons with `Null` are always false;
    /// `not` of `Null` is true, matching the spec's nil semantics.
    pub fn eval_bool(&self, facts: &Facts) -> bool {
        match self {
            Predicate::Lit(v) => truthy(v),
            Predicate::Fact(name) => truthy(&facts.get(name).cloned().unwrap_or(Value::Null)),
            Predicate::Cmp { op, lhs, rhs } => {
                let l = lhs.eval_value(facts);
                let r = rhs.eval_value(facts);
                compare(op, &l, &r)
            }
            Predicate::And(a, b) => a.eval_bool(facts) && b.eval_bool(facts),
            Predicate::Or(a, b) => a.eval_bool(facts) || b.eval_bool(facts),
            Predicate::Not(a) => {
                if matches!(a.eval_value(facts), Value::Null) {
                    true
                } else {
                    !a.eval_bool(facts)
                }
            }
            Predicate::In { needle, haystack } => {
                let n = needle.eval_value(facts);
                match haystack.eval_value(facts) {
                    Value::Array(items) => items.contains(&n),
                    _ => false,
                }
            }
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        other => !other.is_null() && *other != Value::Bool(false),
    }
}

fn compare(op: &CmpOp, l: &Value, r: &Value) -> bool {
    if l.is_null() || r.is_null() {
        return false;
    }
    match op {
        CmpOp::Eq => l == r,
        CmpOp::Neq => l != r,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let (Some(lf), Some(rf)) = (as_f64(l), as_f64(r)) else {
                return false;
            };
            match op {
                CmpOp::Lt => lf < rf,
                CmpOp::Le => lf <= rf,
                CmpOp::Gt => lf > rf,
                CmpOp::Ge => lf >= rf,
                _ => unreachable!(),
            }
        }
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Why a command was skipped, surfaced in its `CommandResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    When,
    Creates(String),
    Removes(String),
    OnlyIf(String),
    Unless(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::When => write!(f, "when predicate was false"),
            SkipReason::Creates(path) => write!(f, "creates: '{path}' already exists"),
            SkipReason::Removes(path) => write!(f, "removes: '{path}' does not exist"),
            SkipReason::OnlyIf(probe) => write!(f, "onlyif probe '{probe}' exited non-zero"),
            SkipReason::Unless(probe) => write!(f, "unless probe '{probe}' exited zero"),
        }
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Evaluates all of a command's guards in spec order, running path/shell
/// probes on the target host through the same dispatcher the command itself
/// will use. Returns `Some(reason)` if the command should be skipped.
pub async fn evaluate(
    command: &Command,
    target: &HostTarget,
    facts: &Facts,
    dispatcher: &Dispatcher,
) -> Option<SkipReason> {
    if !command.when.eval_bool(facts) {
        return Some(SkipReason::When);
    }

    if let Some(path) = &command.creates {
        if path_exists(target, path, dispatcher).await {
            return Some(SkipReason::Creates(path.clone()));
        }
    }

    if let Some(path) = &command.removes {
        if !path_exists(target, path, dispatcher).await {
            return Some(SkipReason::Removes(path.clone()));
        }
    }

    if let Some(probe) = &command.onlyif {
        if !probe_succeeds(target, probe, dispatcher).await {
            return Some(SkipReason::OnlyIf(probe.clone()));
        }
    }

    if let Some(probe) = &command.unless {
        if probe_succeeds(target, probe, dispatcher).await {
            return Some(SkipReason::Unless(probe.clone()));
        }
    }

    None
}

async fn path_exists(target: &HostTarget, path: &str, dispatcher: &Dispatcher) -> bool {
    let probe = format!("test -e {}", shell_escape::escape(path.into()));
    probe_succeeds(target, &probe, dispatcher).await
}

async fn probe_succeeds(target: &HostTarget, probe: &str, dispatcher: &Dispatcher) -> bool {
    match dispatcher.exec(target, probe, PROBE_TIMEOUT).await {
        Ok(output) => output.exit_code == 0,
        Err(_) => false,
    }
}
