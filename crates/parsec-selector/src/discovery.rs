//! Service discovery sources.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::SelectorError;
use crate::node::Node;

/// Source of nodes for a named service.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Lists all known nodes for `service`.
    async fn list(&self, service: &str) -> Result<Vec<Node>, SelectorError>;
}

/// In-memory discovery over a fixed (but mutable) service table.
///
/// The registry backing for direct-connect deployments and tests; remote
/// registries implement [`Discovery`] over their own lookup.
#[derive(Default)]
pub struct StaticDiscovery {
    services: DashMap<String, Vec<Node>>,
}

impl StaticDiscovery {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the node list for `service`.
    pub fn set_nodes(&self, service: impl Into<String>, nodes: Vec<Node>) {
        self.services.insert(service.into(), nodes);
    }

    /// Adds one node to `service`, creating the entry on first use.
    pub fn add_node(&self, node: Node) {
        self.services
            .entry(node.service.clone())
            .or_default()
            .push(node);
    }

    /// Removes the service entirely.
    pub fn remove_service(&self, service: &str) {
        self.services.remove(service);
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn list(&self, service: &str) -> Result<Vec<Node>, SelectorError> {
        self.services
            .get(service)
            .map(|nodes| nodes.clone())
            .ok_or_else(|| SelectorError::ServiceNotFound(service.to_owned()))
    }
}
