//! Graph Snapshots
//!
//! A snapshot is a plain-data copy of one owner's nodes: who depends on
//! whom, at which depth, and whether each node is dirty or failed. It is
//! meant for devtools and test assertions, and can be shipped as JSON or
//! MessagePack.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// One node as seen at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Arena index of the node.
    pub key: usize,
    pub provider: String,
    pub provider_id: u64,
    pub kind: ProviderKind,
    pub depth: u32,
    /// `initializing`, `ready` or `failed`.
    pub status: String,
    pub dirty: bool,
    /// Provider names, in registration order.
    pub dependencies: Vec<String>,
    pub dependents: usize,
    pub listeners: usize,
    pub error: Option<String>,
    /// `Debug` rendering of the value, when the owner traces values.
    pub value: Option<String>,
}

/// All nodes one owner materialized, in flush order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub owner: String,
    pub parent: Option<String>,
    pub flush_pending: bool,
    pub disposed: bool,
    pub overrides: usize,
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    /// Find a node by provider name.
    pub fn node(&self, provider: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.provider == provider)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Encode as MessagePack with named fields.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OwnerConfig;
    use crate::owner::GraphOwner;
    use crate::provider::{Provider, StateProvider};

    fn sample() -> GraphOwner {
        let owner = GraphOwner::builder()
            .label("inspect")
            .config(OwnerConfig {
                trace_values: true,
                ..OwnerConfig::default()
            })
            .build()
            .unwrap();
        let count = StateProvider::with_value("count", 2);
        let watched = count.clone();
        let doubled = Provider::new("doubled", move |r| Ok(r.watch(&watched)? * 2));
        let broken: Provider<i32> = Provider::new("broken", |_| Err("offline".into()));

        owner.read(&doubled).unwrap();
        owner.read(&broken).unwrap_err();
        owner.set(&count, 3).unwrap();
        owner
    }

    #[test]
    fn snapshot_lists_nodes_in_flush_order() {
        let snapshot = sample().snapshot();

        assert_eq!(snapshot.owner, "inspect");
        assert!(snapshot.flush_pending);
        let names: Vec<_> = snapshot.nodes.iter().map(|node| node.provider.as_str()).collect();
        assert_eq!(names, vec!["count", "broken", "doubled"]);

        let count = snapshot.node("count").unwrap();
        assert!(count.dirty);
        assert_eq!(count.dependents, 1);
        assert_eq!(count.value.as_deref(), Some("3"));

        let doubled = snapshot.node("doubled").unwrap();
        assert_eq!(doubled.depth, 1);
        assert_eq!(doubled.kind, ProviderKind::Computed);
        assert_eq!(doubled.dependencies, vec!["count".to_string()]);

        let broken = snapshot.node("broken").unwrap();
        assert_eq!(broken.status, "failed");
        assert!(broken.error.as_deref().unwrap().contains("offline"));
    }

    #[test]
    fn snapshot_survives_json_and_msgpack() {
        let snapshot = sample().snapshot();

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"kind\":\"computed\""));
        assert_eq!(GraphSnapshot::from_json(&json).unwrap(), snapshot);

        let bytes = snapshot.to_msgpack().unwrap();
        assert_eq!(GraphSnapshot::from_msgpack(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn values_are_hidden_unless_traced() {
        let owner = GraphOwner::new();
        let count = StateProvider::with_value("count", 1);
        owner.read(&count).unwrap();

        assert_eq!(owner.snapshot().node("count").unwrap().value, None);
    }
}
