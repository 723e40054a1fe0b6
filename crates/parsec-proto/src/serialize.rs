//! Body serializer registry keyed by wire type codes.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::ProtoError;

/// Raw bytes passthrough (pre-marshalled payloads, e.g. protobuf).
pub const SERIALIZATION_RAW: u8 = 0;

/// JSON body serialization.
pub const SERIALIZATION_JSON: u8 = 2;

/// No-op type code; short-circuits without a registry lookup.
pub const SERIALIZATION_NOOP: u8 = 4;

/// A call body as a tagged variant rather than an untyped value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// No body at all (bodyless calls, send-only acks).
    #[default]
    Empty,
    /// Opaque bytes; forwarded without interpretation.
    Raw(Bytes),
    /// A JSON document.
    Json(serde_json::Value),
}

impl Body {
    /// True when the body carries no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Pluggable body serializer selected by a numeric wire code.
pub trait Serializer: Send + Sync {
    /// Marshals a body to wire bytes.
    fn marshal(&self, body: &Body) -> Result<Bytes, ProtoError>;

    /// Unmarshals wire bytes into a body.
    fn unmarshal(&self, buf: &[u8]) -> Result<Body, ProtoError>;
}

/// Registry of serializers keyed by wire type code.
///
/// Registration is last-wins and consulted at call time, so a process can
/// swap implementations without touching the dispatch core. An explicit
/// registry object is passed by reference instead of package-level state,
/// keeping tests free of global reset logic.
pub struct SerializerRegistry {
    entries: DashMap<u8, Arc<dyn Serializer>>,
}

impl SerializerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Creates a registry with the built-in serializers registered.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(SERIALIZATION_RAW, Arc::new(RawSerializer));
        registry.register(SERIALIZATION_JSON, Arc::new(JsonSerializer));
        registry
    }

    /// Registers a serializer for a type code. Last registration wins.
    pub fn register(&self, code: u8, serializer: Arc<dyn Serializer>) {
        self.entries.insert(code, serializer);
    }

    /// Marshals a body using the serializer for `code`.
    ///
    /// An empty body is a no-op success without any lookup, even for
    /// unregistered codes: callers rely on this to skip body processing
    /// for bodyless calls.
    pub fn marshal(&self, code: u8, body: &Body) -> Result<Bytes, ProtoError> {
        if body.is_empty() {
            return Ok(Bytes::new());
        }
        if code == SERIALIZATION_NOOP {
            return passthrough(body);
        }
        let serializer = self
            .entries
            .get(&code)
            .ok_or(ProtoError::SerializerNotRegistered(code))?;
        serializer.marshal(body)
    }

    /// Unmarshals wire bytes using the serializer for `code`.
    ///
    /// Empty input is a no-op success (`Body::Empty`) without any lookup.
    pub fn unmarshal(&self, code: u8, buf: &[u8]) -> Result<Body, ProtoError> {
        if buf.is_empty() {
            return Ok(Body::Empty);
        }
        if code == SERIALIZATION_NOOP {
            return Ok(Body::Raw(Bytes::copy_from_slice(buf)));
        }
        let serializer = self
            .entries
            .get(&code)
            .ok_or(ProtoError::SerializerNotRegistered(code))?;
        serializer.unmarshal(buf)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn passthrough(body: &Body) -> Result<Bytes, ProtoError> {
    match body {
        Body::Empty => Ok(Bytes::new()),
        Body::Raw(bytes) => Ok(bytes.clone()),
        Body::Json(_) => Err(ProtoError::Serialisation(
            "no-op serialization requires a raw body".into(),
        )),
    }
}

/// Passthrough serializer for pre-marshalled bodies.
struct RawSerializer;

impl Serializer for RawSerializer {
    fn marshal(&self, body: &Body) -> Result<Bytes, ProtoError> {
        passthrough(body)
    }

    fn unmarshal(&self, buf: &[u8]) -> Result<Body, ProtoError> {
        Ok(Body::Raw(Bytes::copy_from_slice(buf)))
    }
}

/// JSON serializer backed by serde_json.
struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn marshal(&self, body: &Body) -> Result<Bytes, ProtoError> {
        match body {
            Body::Empty => Ok(Bytes::new()),
            Body::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| ProtoError::Serialisation(e.to_string())),
            Body::Raw(_) => Err(ProtoError::Serialisation(
                "JSON serialization requires a JSON body".into(),
            )),
        }
    }

    fn unmarshal(&self, buf: &[u8]) -> Result<Body, ProtoError> {
        serde_json::from_slice(buf)
            .map(Body::Json)
            .map_err(|e| ProtoError::Serialisation(e.to_string()))
    }
}
