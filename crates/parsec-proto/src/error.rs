//! Error types for the wire protocol.

use thiserror::Error;

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// The frame did not start with the protocol magic.
    #[error("bad frame magic: {0:#06x}")]
    BadMagic(u16),

    /// Declared frame length is impossible (shorter than its own headers).
    #[error("frame length {total} shorter than header section {header}")]
    FrameTooShort { total: usize, header: usize },

    /// Declared frame length exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Envelope section ended before a declared field.
    #[error("truncated envelope while reading {0}")]
    Truncated(&'static str),

    /// An envelope field exceeds the range of its wire length prefix.
    #[error("{field} too long for wire encoding: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },

    /// A string field held invalid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Response carried a different request id than the request.
    #[error("request id mismatch: sent {sent}, received {received}")]
    RequestIdMismatch { sent: u32, received: u32 },

    /// Serialization type code with no registered serializer.
    #[error("serializer not registered for type {0}")]
    SerializerNotRegistered(u8),

    /// Compression type code with no registered compressor.
    #[error("compressor not registered for type {0}")]
    CompressorNotRegistered(u8),

    /// Body (de)serialisation failure.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Body (de)compression failure.
    #[error("compression error: {0}")]
    Compression(String),
}
