//! Service node descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::breaker::CircuitBreaker;

/// One callable instance of a service.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Dotted service name this node serves.
    pub service: String,
    /// Dialable `host:port` address.
    pub address: String,
    /// Network family: `tcp` or `udp`.
    pub network: String,
    /// Wire protocol spoken by the node.
    pub protocol: String,
    /// Relative selection weight. A zero-weight node receives no traffic
    /// while any peer still carries weight.
    pub weight: u32,
    /// Free-form registry metadata (region, set, version).
    pub metadata: HashMap<String, String>,
    /// Breaker handle stashed at selection time so outcome reports reach
    /// the same state machine that admitted the call.
    pub breaker: Option<Arc<CircuitBreaker>>,
}

impl Node {
    /// Creates a TCP node with default weight.
    #[must_use]
    pub fn new(service: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            address: address.into(),
            network: "tcp".into(),
            protocol: "parsec".into(),
            weight: 1,
            metadata: HashMap::new(),
            breaker: None,
        }
    }

    /// Sets the network family.
    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Sets the selection weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let node = Node::new("app.server.service.obj", "127.0.0.1:9000");
        assert_eq!(node.network, "tcp");
        assert_eq!(node.weight, 1);
        assert!(node.breaker.is_none());

        let udp = Node::new("a", "b").with_network("udp").with_weight(3);
        assert_eq!(udp.network, "udp");
        assert_eq!(udp.weight, 3);
    }
}
