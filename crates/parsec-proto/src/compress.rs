//! Body compressor registry keyed by wire type codes.

use std::io::{Read, Write};
use std::sync::Arc;

use dashmap::DashMap;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::error::ProtoError;

/// No compression; short-circuits without a registry lookup.
pub const COMPRESSION_NONE: u8 = 0;

/// Gzip compression.
pub const COMPRESSION_GZIP: u8 = 1;

/// Zlib compression.
pub const COMPRESSION_ZLIB: u8 = 2;

/// Zstd compression.
pub const COMPRESSION_ZSTD: u8 = 3;

/// Pluggable body compressor selected by a numeric wire code.
pub trait Compressor: Send + Sync {
    /// Compresses body bytes.
    fn compress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError>;

    /// Decompresses body bytes.
    fn decompress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError>;
}

/// Registry of compressors keyed by wire type code.
///
/// Same contract as the serializer registry: last registration wins,
/// empty input is a no-op success, an unknown code with a payload is a
/// hard error.
pub struct CompressorRegistry {
    entries: DashMap<u8, Arc<dyn Compressor>>,
}

impl CompressorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Creates a registry with the built-in compressors registered.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(COMPRESSION_GZIP, Arc::new(GzipCompressor));
        registry.register(COMPRESSION_ZLIB, Arc::new(ZlibCompressor));
        registry.register(COMPRESSION_ZSTD, Arc::new(ZstdCompressor));
        registry
    }

    /// Registers a compressor for a type code. Last registration wins.
    pub fn register(&self, code: u8, compressor: Arc<dyn Compressor>) {
        self.entries.insert(code, compressor);
    }

    /// Compresses body bytes using the compressor for `code`.
    pub fn compress(&self, code: u8, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        if code == COMPRESSION_NONE || buf.is_empty() {
            return Ok(buf.to_vec());
        }
        let compressor = self
            .entries
            .get(&code)
            .ok_or(ProtoError::CompressorNotRegistered(code))?;
        compressor.compress(buf)
    }

    /// Decompresses body bytes using the compressor for `code`.
    pub fn decompress(&self, code: u8, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        if code == COMPRESSION_NONE || buf.is_empty() {
            return Ok(buf.to_vec());
        }
        let compressor = self
            .entries
            .get(&code)
            .ok_or(ProtoError::CompressorNotRegistered(code))?;
        compressor.decompress(buf)
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn compress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(buf)
            .and_then(|()| encoder.finish())
            .map_err(|e| ProtoError::Compression(e.to_string()))
    }

    fn decompress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::new();
        GzDecoder::new(buf)
            .read_to_end(&mut out)
            .map_err(|e| ProtoError::Compression(e.to_string()))?;
        Ok(out)
    }
}

struct ZlibCompressor;

impl Compressor for ZlibCompressor {
    fn compress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(buf)
            .and_then(|()| encoder.finish())
            .map_err(|e| ProtoError::Compression(e.to_string()))
    }

    fn decompress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::new();
        ZlibDecoder::new(buf)
            .read_to_end(&mut out)
            .map_err(|e| ProtoError::Compression(e.to_string()))?;
        Ok(out)
    }
}

struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        zstd::encode_all(buf, 0).map_err(|e| ProtoError::Compression(e.to_string()))
    }

    fn decompress(&self, buf: &[u8]) -> Result<Vec<u8>, ProtoError> {
        zstd::decode_all(buf).map_err(|e| ProtoError::Compression(e.to_string()))
    }
}
