//! Transports for Parsec RPC.
//!
//! This crate moves complete frames between peers:
//!
//! - [`Framer`]: splits a byte stream into self-delimited frames
//! - [`ConnectionPool`]: per-address pools of persistent connections with
//!   bounded idle/active counts and background health checking
//! - [`TcpClientTransport`] / [`UdpClientTransport`]: outbound round trips
//!   with deadline and cancellation propagation
//! - [`TcpServerTransport`] / [`UdpServerTransport`]: accept/receive loops
//!   dispatching decoded frames to a [`FrameHandler`]

pub mod client;
pub mod error;
pub mod framer;
pub mod pool;
pub mod server;

pub use client::{CallOptions, ClientTransport, TcpClientTransport, UdpClientTransport};
pub use error::TransportError;
pub use framer::Framer;
pub use pool::{ConnectionPool, PooledConn};
pub use server::{FrameHandler, TcpServerTransport, UdpServerTransport};
