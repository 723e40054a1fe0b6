//! Candidate filtering between discovery and load balancing.

use async_trait::async_trait;

use crate::error::SelectorError;
use crate::node::Node;

/// Narrows a discovered node list before balancing.
///
/// Implementations filter on metadata: same-region preference, canary
/// sets, dyeing routes. Returning an empty list is legal and surfaces as
/// a no-available-node error in the selector.
#[async_trait]
pub trait ServiceRouter: Send + Sync {
    /// Filters the candidate list for `service`.
    async fn filter(&self, service: &str, nodes: Vec<Node>) -> Result<Vec<Node>, SelectorError>;
}

/// Pass-through router.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRouter;

#[async_trait]
impl ServiceRouter for NoopRouter {
    async fn filter(&self, _service: &str, nodes: Vec<Node>) -> Result<Vec<Node>, SelectorError> {
        Ok(nodes)
    }
}
