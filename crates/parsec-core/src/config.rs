//! Configuration option structs.
//!
//! These are consumed as opaque values: loading them from files or the
//! environment happens outside this core.

use std::time::Duration;

use serde::Deserialize;

/// Connection pool sizing and lifecycle knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections kept per destination address.
    pub max_idle: usize,
    /// Maximum concurrently checked-out connections (0 = unlimited).
    pub max_active: usize,
    /// When the active limit is reached: block (`true`) or fail fast.
    pub wait: bool,
    /// Idle connections older than this are evicted.
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Connections older than this are evicted regardless of use.
    #[serde(with = "duration_ms")]
    pub max_conn_lifetime: Duration,
    /// Timeout for establishing a new connection.
    #[serde(with = "duration_ms")]
    pub dial_timeout: Duration,
    /// Interval between health checker passes.
    #[serde(with = "duration_ms")]
    pub check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 64,
            max_active: 0,
            wait: false,
            idle_timeout: Duration::from_secs(50),
            max_conn_lifetime: Duration::from_secs(0),
            dial_timeout: Duration::from_millis(200),
            check_interval: Duration::from_secs(3),
        }
    }
}

/// Client-side call defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network family: `tcp` or `udp`.
    pub network: String,
    /// Default per-call timeout.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Default body serialization type code.
    pub serialization: u8,
    /// Default body compression type code.
    pub compression: u8,
    /// Dial a fresh connection per call instead of pooling.
    pub disable_pool: bool,
    /// Pool knobs for pooled calls.
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: "tcp".into(),
            timeout: Duration::from_secs(1),
            serialization: 0,
            compression: 0,
            disable_pool: false,
            pool: PoolConfig::default(),
        }
    }
}

/// Server transport knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub bind: String,
    /// Network family: `tcp` or `udp`.
    pub network: String,
    /// Connections idle longer than this are closed.
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Per-request handler budget (0 = no server-imposed limit). The
    /// effective deadline is the smaller of this and the caller's
    /// remaining budget.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Dispatch each decoded request on its own task instead of serially
    /// per connection. Disclaims response ordering on one connection.
    pub async_dispatch: bool,
    /// Number of UDP receive tasks (0 = available parallelism).
    pub udp_listeners: usize,
    /// Maximum accepted frame size.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".into(),
            network: "tcp".into(),
            idle_timeout: Duration::from_secs(60),
            timeout: Duration::ZERO,
            async_dispatch: true,
            udp_listeners: 0,
            max_frame_size: parsec_proto::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
