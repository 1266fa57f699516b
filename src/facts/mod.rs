//! Facts provider: the seam the guard evaluator reads `when` predicates
//! through. The core treats facts as opaque input — it never gathers them
//! itself (§1's explicit scope line keeps host reachability/fact collection
//! an external collaborator).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Host;

/// Given a host, returns a map of facts (`os`, `os_family`, `arch`,
/// `hostname`, `cpu_count`, `memory_mb`, and implementation-defined
/// extensions). Implemented by an external collector in production; tests
/// and callers that gather facts out of band use `StaticFacts`.
#[async_trait]
pub trait FactsProvider: Send + Sync {
    async fn facts(&self, host: &Host) -> HashMap<String, Value>;
}

/// A facts provider backed by a pre-populated map, keyed by host name. A
/// host with no entry gets an empty fact set rather than an error — the
/// guard evaluator already treats a missing fact as nil.
#[derive(Debug, Clone, Default)]
pub struct StaticFacts {
    per_host: HashMap<String, HashMap<String, Value>>,
}

impl StaticFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, host: impl Into<String>, facts: HashMap<String, Value>) -> Self {
        self.per_host.insert(host.into(), facts);
        self
    }
}

#[async_trait]
impl FactsProvider for StaticFacts {
    async fn facts(&self, host: &Host) -> HashMap<String, Value> {
        self.per_host.get(&host.name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn known_host_returns_its_facts() {
        let mut facts = HashMap::new();
        facts.insert("os_family".to_string(), json!("debian"));
        let provider = StaticFacts::new().set("web1", facts);

        let result = provider.facts(&Host::new("web1", "10.0.0.1")).await;
        assert_eq!(result.get("os_family"), Some(&json!("debian")));
    }

    #[tokio::test]
    async fn unknown_host_returns_empty_map() {
        let provider = StaticFacts::new();
        let result = provider.facts(&Host::new("ghost", "10.0.0.9")).await;
        assert!(result.is_empty());
    }
}
