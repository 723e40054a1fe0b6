//! Circuit breaker for node resilience.
//!
//! The circuit breaker stops calls to failing nodes before they cascade.
//! It has three states:
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: the node is failing, calls are rejected immediately
//! - **HalfOpen**: testing whether the node has recovered

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Breaker thresholds and recovery timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Successes in half-open that close the circuit.
    pub success_threshold: u32,
    /// Time an open circuit waits before probing recovery.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 5_000,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through.
    Closed,
    /// Node is failing - calls are rejected.
    Open,
    /// Testing recovery - limited calls pass through.
    HalfOpen,
}

/// Circuit breaker for a single node.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    /// Milliseconds since `epoch` of the last recorded failure.
    last_failure_ms: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Check whether a call should be allowed through.
    ///
    /// An open circuit whose reset timeout has elapsed transitions to
    /// half-open and admits the call as a recovery probe.
    pub async fn admit(&self) -> bool {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_failure = self.last_failure_ms.load(Ordering::Relaxed);
                let elapsed = self.now_ms().saturating_sub(last_failure);
                if elapsed < self.config.reset_timeout_ms {
                    return false;
                }
                let mut state_guard = self.state.write().await;
                if *state_guard == CircuitState::Open {
                    *state_guard = CircuitState::HalfOpen;
                    self.success_count.store(0, Ordering::Relaxed);
                    info!("circuit breaker transitioning to half-open");
                }
                true
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.success_threshold {
                    let mut state_guard = self.state.write().await;
                    if *state_guard == CircuitState::HalfOpen {
                        *state_guard = CircuitState::Closed;
                        self.failure_count.store(0, Ordering::Relaxed);
                        self.success_count.store(0, Ordering::Relaxed);
                        info!("circuit breaker closed after successful recovery");
                    }
                }
            }
            CircuitState::Open => {
                // Shouldn't happen, but reset if it does
                self.failure_count.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self) {
        let state = *self.state.read().await;

        match state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.failure_threshold {
                    let mut state_guard = self.state.write().await;
                    if *state_guard == CircuitState::Closed {
                        *state_guard = CircuitState::Open;
                        self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);
                        warn!(failure_count = count, "circuit breaker opened due to failures");
                    }
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open immediately reopens the circuit
                let mut state_guard = self.state.write().await;
                if *state_guard == CircuitState::HalfOpen {
                    *state_guard = CircuitState::Open;
                    self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);
                    self.success_count.store(0, Ordering::Relaxed);
                    warn!("circuit breaker reopened after failure in half-open state");
                }
            }
            CircuitState::Open => {
                self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);
            }
        }
    }

    /// Get the current state.
    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Get the current failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// Registry of circuit breakers keyed by node address.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create a new registry with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get or create a circuit breaker for the given node address.
    pub fn get_or_create(&self, address: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(address.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout_ms: 50,
        }
    }

    #[tokio::test]
    async fn starts_closed() {
        let cb = CircuitBreaker::new(test_config());
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.admit().await);
    }

    #[tokio::test]
    async fn opens_after_failures() {
        let cb = CircuitBreaker::new(test_config());

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.admit().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(test_config());

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.failure_count(), 2);

        cb.record_success().await;
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let cb = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(cb.admit().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(test_config());
        for _ in 0..3 {
            cb.record_failure().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(cb.admit().await);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.admit().await);
    }

    #[tokio::test]
    async fn registry_creates_breakers() {
        let registry = CircuitBreakerRegistry::new(test_config());

        let breaker1 = registry.get_or_create("10.0.0.1:9000");
        let breaker2 = registry.get_or_create("10.0.0.1:9000");
        let breaker3 = registry.get_or_create("10.0.0.2:9000");

        assert!(Arc::ptr_eq(&breaker1, &breaker2));
        assert!(!Arc::ptr_eq(&breaker1, &breaker3));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 10}"#).unwrap();
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.success_threshold, 2);
    }
}
