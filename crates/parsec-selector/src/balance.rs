//! Weight-aware load balancing across candidate nodes.
//!
//! Every strategy spreads calls in proportion to [`Node::weight`]: a
//! weight-3 node takes three times the traffic of a weight-1 peer, and a
//! zero-weight node takes none while any peer still carries weight. Slot
//! walking over the cumulative weight keeps selection allocation-free.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::node::Node;

/// Strategy for picking a slot in the weighted cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalanceStrategy {
    /// Walk the weighted cycle in order; deterministic per balancer.
    #[default]
    RoundRobin,
    /// Pick a weighted slot pseudo-randomly per call.
    Random,
}

/// Distributes calls across candidate nodes in proportion to their weight.
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    counter: AtomicUsize,
}

impl LoadBalancer {
    /// Create a new load balancer with the given strategy.
    #[must_use]
    pub const fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    /// Select a node from the given list.
    ///
    /// Returns `None` if the list is empty. When every node carries zero
    /// weight the balancer falls back to a uniform cycle rather than
    /// blackholing the service.
    pub fn select<'a>(&self, nodes: &'a [Node]) -> Option<&'a Node> {
        if nodes.is_empty() {
            return None;
        }
        if nodes.len() == 1 {
            return nodes.first();
        }

        let tick = match self.strategy {
            LoadBalanceStrategy::RoundRobin => self.counter.fetch_add(1, Ordering::Relaxed) as u64,
            LoadBalanceStrategy::Random => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
        };

        let total: u64 = nodes.iter().map(|n| u64::from(n.weight)).sum();
        if total == 0 {
            return nodes.get((tick % nodes.len() as u64) as usize);
        }

        // Walk the cumulative weight to the slot's owner.
        let mut slot = tick % total;
        nodes.iter().find(|node| {
            let weight = u64::from(node.weight);
            if slot < weight {
                true
            } else {
                slot -= weight;
                false
            }
        })
    }

    /// Get the current strategy.
    #[must_use]
    pub const fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::RoundRobin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted_nodes(weights: &[u32]) -> Vec<Node> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Node::new("app.sv.s.o", format!("10.0.0.{}:9000", i + 1)).with_weight(*w))
            .collect()
    }

    #[test]
    fn empty_list_returns_none() {
        let lb = LoadBalancer::default();
        assert!(lb.select(&[]).is_none());
    }

    #[test]
    fn single_node_always_selected() {
        let lb = LoadBalancer::default();
        let nodes = weighted_nodes(&[1]);

        for _ in 0..10 {
            assert_eq!(lb.select(&nodes).unwrap().address, "10.0.0.1:9000");
        }
    }

    #[test]
    fn round_robin_cycles_through_equal_weights() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = weighted_nodes(&[1, 1, 1]);

        for i in 0..9 {
            let selected = lb.select(&nodes).unwrap();
            assert_eq!(selected.address, nodes[i % 3].address, "iteration {i}");
        }
    }

    #[test]
    fn round_robin_honors_weights() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = weighted_nodes(&[2, 1, 1]);

        // One full cycle covers four slots: two for the heavy node, one
        // apiece for the light ones.
        let expected = [0usize, 0, 1, 2, 0, 0, 1, 2];
        for (i, want) in expected.iter().enumerate() {
            let selected = lb.select(&nodes).unwrap();
            assert_eq!(selected.address, nodes[*want].address, "slot {i}");
        }
    }

    #[test]
    fn zero_weight_node_gets_no_traffic() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = weighted_nodes(&[0, 1]);

        for _ in 0..10 {
            assert_eq!(lb.select(&nodes).unwrap().address, nodes[1].address);
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_uniform_cycle() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = weighted_nodes(&[0, 0, 0]);

        for i in 0..6 {
            let selected = lb.select(&nodes).unwrap();
            assert_eq!(selected.address, nodes[i % 3].address, "iteration {i}");
        }
    }

    #[test]
    fn random_selects_only_weighted_nodes() {
        let lb = LoadBalancer::new(LoadBalanceStrategy::Random);
        let nodes = weighted_nodes(&[3, 0, 1]);

        for _ in 0..100 {
            let selected = lb.select(&nodes).unwrap();
            assert_ne!(selected.address, nodes[1].address);
        }
    }

    #[test]
    fn default_is_round_robin() {
        let lb = LoadBalancer::default();
        assert_eq!(lb.strategy(), LoadBalanceStrategy::RoundRobin);
    }
}
