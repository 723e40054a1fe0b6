//! Parsec RPC dispatch pipelines.
//!
//! The [`Client`] drives an outbound call end to end: marshal and compress
//! the body, encode the request frame, run the filter chain around the
//! transport round trip, then decode, decompress and unmarshal the
//! response. The [`Server`] runs the mirror image behind a listening
//! transport: decode the request, populate a pooled message context, run
//! the filter chain into the registered [`Method`], and encode the
//! response.

pub mod client;
pub mod server;

pub use client::Client;
pub use server::{FnMethod, Method, Server, ServerDispatcher, Service};
