//! Core dispatch infrastructure for Parsec RPC.
//!
//! This crate provides the pieces shared by the client and server
//! dispatch pipelines:
//!
//! - **Message context**: per-call mutable state threaded through codec,
//!   filters and transport, pooled for reuse
//! - **Filter chain**: ordered interceptor pipeline wrapping the actual
//!   invocation on both sides
//! - **Error taxonomy**: framework vs business vs callee-framework errors
//!   with stable numeric codes
//! - **Configuration**: option structs consumed as opaque values
//! - **Registry**: explicit name-keyed registry objects passed by
//!   reference instead of package-level mutable state

pub mod config;
pub mod error;
pub mod filter;
pub mod message;
pub mod pool;
pub mod registry;

pub use config::{ClientConfig, PoolConfig, ServerConfig};
pub use error::{FrameworkError, BUSINESS_ERROR_BOUNDARY};
pub use filter::{Filter, FilterChain, Handler, HandlerFuture, Next};
pub use message::{Message, ServiceName};
pub use pool::{MessageGuard, MessagePool};
pub use registry::NamedRegistry;
