//! Wire protocol for Parsec RPC inter-service communication.
//!
//! This crate owns everything that touches bytes on the wire:
//!
//! - Frame header encoding/decoding with length validation
//! - Request/response envelope (de)serialisation
//! - Client and server envelope codecs
//! - Numeric-code-keyed serializer and compressor registries
//!
//! # Wire Format
//!
//! Every frame starts with a 16-byte fixed header, followed by a
//! length-prefixed envelope section and the opaque body:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                Frame Header (16 bytes, fixed)                 │
//! ├─────────┬──────┬──────┬───────────┬────────────┬──────────┬──┤
//! │ Magic(2)│ FT(1)│ SF(1)│ Total(4)  │ HdrLen(2)  │ Stream(4)│R2│
//! ├─────────┴──────┴──────┴───────────┴────────────┴──────────┴──┤
//! │             Envelope (HdrLen bytes, big-endian)               │
//! ├──────────────────────────────────────────────────────────────┤
//! │                     Body (Total - 16 - HdrLen)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod compress;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod serialize;

pub use codec::{ClientCodec, DecodedRequest, ServerCodec};
pub use compress::{Compressor, CompressorRegistry};
pub use envelope::{split_method, RequestEnvelope, ResponseEnvelope};
pub use error::ProtoError;
pub use frame::{FrameHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, PROTOCOL_MAGIC};
pub use serialize::{Body, Serializer, SerializerRegistry};
