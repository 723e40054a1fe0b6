//! Selection error types.

use thiserror::Error;

use parsec_core::FrameworkError;

/// Errors that can occur while selecting or reporting a node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// Discovery has no record of the service.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The service is known but no candidate node survived the pipeline.
    #[error("no available node for service: {0}")]
    NoAvailableNode(String),

    /// Every remaining candidate's circuit breaker rejected the call.
    #[error("circuit open for service: {0}")]
    CircuitOpen(String),

    /// An outcome was reported for a node without a breaker handle.
    #[error("no circuit breaker stashed for node: {0}")]
    MissingBreaker(String),
}

impl From<SelectorError> for FrameworkError {
    fn from(err: SelectorError) -> Self {
        Self::Route(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_failures_are_route_errors() {
        let err = FrameworkError::from(SelectorError::NoAvailableNode("a.b.c.d".into()));
        assert!(matches!(err, FrameworkError::Route(_)));
    }
}
