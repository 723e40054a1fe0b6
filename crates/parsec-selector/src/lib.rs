//! Node selection for Parsec RPC.
//!
//! A [`Selector`] composes the addressing pipeline for one call:
//! [`Discovery`] lists a service's nodes, a [`ServiceRouter`] narrows the
//! candidates, circuit breakers veto nodes that are failing, and a
//! [`LoadBalancer`] picks one of what remains. Call outcomes flow back in
//! through [`Selector::report`] to drive the breaker state machines.

pub mod balance;
pub mod breaker;
pub mod discovery;
pub mod error;
pub mod node;
pub mod router;
pub mod selector;

pub use balance::{LoadBalanceStrategy, LoadBalancer};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use discovery::{Discovery, StaticDiscovery};
pub use error::SelectorError;
pub use node::Node;
pub use router::{NoopRouter, ServiceRouter};
pub use selector::Selector;
