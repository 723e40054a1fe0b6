//! The composed selection pipeline.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use parsec_core::FrameworkError;

use crate::balance::LoadBalancer;
use crate::breaker::CircuitBreakerRegistry;
use crate::discovery::Discovery;
use crate::error::SelectorError;
use crate::node::Node;
use crate::router::{NoopRouter, ServiceRouter};

/// Picks one node per call and feeds call outcomes back to the breakers.
///
/// Pipeline per [`Selector::select`]: discovery list, router filter,
/// breaker admission, load balance. The chosen node carries its breaker
/// handle so [`Selector::report`] reaches the same state machine.
pub struct Selector {
    discovery: Arc<dyn Discovery>,
    router: Arc<dyn ServiceRouter>,
    balancer: LoadBalancer,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
}

impl Selector {
    /// Creates a selector with a pass-through router and no breakers.
    #[must_use]
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            router: Arc::new(NoopRouter),
            balancer: LoadBalancer::default(),
            breakers: None,
        }
    }

    /// Replaces the router.
    #[must_use]
    pub fn with_router(mut self, router: Arc<dyn ServiceRouter>) -> Self {
        self.router = router;
        self
    }

    /// Replaces the load balancer.
    #[must_use]
    pub fn with_balancer(mut self, balancer: LoadBalancer) -> Self {
        self.balancer = balancer;
        self
    }

    /// Enables circuit breaking with the given registry.
    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Selects one node for a call to `service`.
    pub async fn select(&self, service: &str) -> Result<Node, SelectorError> {
        let nodes = self.discovery.list(service).await?;
        let nodes = self.router.filter(service, nodes).await?;
        if nodes.is_empty() {
            return Err(SelectorError::NoAvailableNode(service.to_owned()));
        }

        let candidates = match &self.breakers {
            None => nodes,
            Some(registry) => {
                let mut admitted = Vec::with_capacity(nodes.len());
                for mut node in nodes {
                    let breaker = registry.get_or_create(&node.address);
                    if breaker.admit().await {
                        node.breaker = Some(breaker);
                        admitted.push(node);
                    }
                }
                if admitted.is_empty() {
                    return Err(SelectorError::CircuitOpen(service.to_owned()));
                }
                admitted
            }
        };

        let chosen = self
            .balancer
            .select(&candidates)
            .ok_or_else(|| SelectorError::NoAvailableNode(service.to_owned()))?;
        debug!(service, address = %chosen.address, "node selected");
        Ok(chosen.clone())
    }

    /// Reports a call's outcome against the node chosen for it.
    ///
    /// Framework-level failures count against the node's breaker; business
    /// errors mean the node answered and count as successes.
    pub async fn report(
        &self,
        node: &Node,
        cost: Duration,
        error: Option<&FrameworkError>,
    ) -> Result<(), SelectorError> {
        if self.breakers.is_none() {
            return Ok(());
        }
        let breaker = node
            .breaker
            .as_ref()
            .ok_or_else(|| SelectorError::MissingBreaker(node.address.clone()))?;

        let failed = error.is_some_and(|e| !e.is_business());
        debug!(
            address = %node.address,
            cost_ms = cost.as_millis() as u64,
            failed,
            "call outcome reported"
        );
        if failed {
            breaker.record_failure().await;
        } else {
            breaker.record_success().await;
        }
        Ok(())
    }
}
