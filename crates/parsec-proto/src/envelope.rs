//! Request and response envelope (de)serialisation.
//!
//! The envelope is the structured header carried between the fixed frame
//! header and the opaque body. It is encoded by hand as big-endian,
//! length-prefixed fields so that peers in any language can parse it
//! without a schema compiler.

use std::collections::HashMap;

use crate::error::ProtoError;

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Request/response call with exactly one response expected.
pub const CALL_TYPE_UNARY: u8 = 0;

/// Fire-and-forget call; the server must not write a response.
pub const CALL_TYPE_ONEWAY: u8 = 1;

/// Message-type bit flags carried in the envelope.
pub mod message_flags {
    /// Request is dyed for traffic staining.
    pub const DYEING: u32 = 0x01;
    /// Request carries distributed trace context.
    pub const TRACE: u32 = 0x02;
}

/// Well-known transparent-metadata keys.
pub mod trans_keys {
    /// Dyeing key used to stain a request through the call graph.
    pub const DYEING_KEY: &str = "parsec-dyeing-key";
    /// Environment name transferred across service hops.
    pub const ENV_TRANSFER: &str = "parsec-env";
}

/// Request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestEnvelope {
    /// Envelope format version.
    pub version: u8,
    /// Call type (unary or one-way).
    pub call_type: u8,
    /// Request id, unique per connection-multiplexing scope.
    pub request_id: u32,
    /// Remaining timeout budget in milliseconds (0 = unset).
    pub timeout_ms: u32,
    /// Caller service name (`app.server.service` dotted form).
    pub caller: String,
    /// Callee service name.
    pub callee: String,
    /// Full RPC method string (`/app.server.service/method`).
    pub func: String,
    /// Message-type bit flags.
    pub message_type: u32,
    /// Transparent key-value metadata forwarded verbatim across hops.
    pub trans_info: HashMap<String, Vec<u8>>,
    /// Body serialization type code.
    pub content_type: u8,
    /// Body compression type code.
    pub content_encoding: u8,
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseEnvelope {
    /// Envelope format version.
    pub version: u8,
    /// Call type echoed from the request.
    pub call_type: u8,
    /// Request id echoed from the request.
    pub request_id: u32,
    /// Framework-level error code (0 = success).
    pub ret: i32,
    /// Business-level error code (0 = success).
    pub func_ret: i32,
    /// Human-readable error message.
    pub error_msg: String,
    /// Message-type bit flags.
    pub message_type: u32,
    /// Transparent key-value metadata.
    pub trans_info: HashMap<String, Vec<u8>>,
    /// Body serialization type code.
    pub content_type: u8,
    /// Body compression type code.
    pub content_encoding: u8,
}

impl RequestEnvelope {
    /// Creates an envelope with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: ENVELOPE_VERSION,
            ..Self::default()
        }
    }

    /// Encodes the envelope into the reusable buffer.
    ///
    /// Fails when a field outgrows its wire length prefix; a silent
    /// truncation would produce a frame no peer can decode.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtoError> {
        buf.push(self.version);
        buf.push(self.call_type);
        buf.extend_from_slice(&self.request_id.to_be_bytes());
        buf.extend_from_slice(&self.timeout_ms.to_be_bytes());
        put_str(buf, &self.caller, "caller")?;
        put_str(buf, &self.callee, "callee")?;
        put_str(buf, &self.func, "func")?;
        buf.extend_from_slice(&self.message_type.to_be_bytes());
        put_trans_info(buf, &self.trans_info)?;
        buf.push(self.content_type);
        buf.push(self.content_encoding);
        Ok(())
    }

    /// Decodes an envelope from the frame's header section.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut r = Reader::new(bytes);
        let env = Self {
            version: r.u8("version")?,
            call_type: r.u8("call_type")?,
            request_id: r.u32("request_id")?,
            timeout_ms: r.u32("timeout_ms")?,
            caller: r.string("caller")?,
            callee: r.string("callee")?,
            func: r.string("func")?,
            message_type: r.u32("message_type")?,
            trans_info: r.trans_info()?,
            content_type: r.u8("content_type")?,
            content_encoding: r.u8("content_encoding")?,
        };
        Ok(env)
    }
}

impl ResponseEnvelope {
    /// Builds a response skeleton from a decoded request.
    ///
    /// Copies version, call type, request id and content fields so that
    /// the eventual encode only needs to fill error and trans-info fields.
    #[must_use]
    pub fn reply_to(req: &RequestEnvelope) -> Self {
        Self {
            version: req.version,
            call_type: req.call_type,
            request_id: req.request_id,
            message_type: req.message_type,
            content_type: req.content_type,
            content_encoding: req.content_encoding,
            ..Self::default()
        }
    }

    /// Encodes the envelope into the reusable buffer.
    ///
    /// Same length-prefix bounds as the request encode.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), ProtoError> {
        buf.push(self.version);
        buf.push(self.call_type);
        buf.extend_from_slice(&self.request_id.to_be_bytes());
        buf.extend_from_slice(&self.ret.to_be_bytes());
        buf.extend_from_slice(&self.func_ret.to_be_bytes());
        put_bytes_u32(buf, self.error_msg.as_bytes(), "error_msg")?;
        buf.extend_from_slice(&self.message_type.to_be_bytes());
        put_trans_info(buf, &self.trans_info)?;
        buf.push(self.content_type);
        buf.push(self.content_encoding);
        Ok(())
    }

    /// Decodes an envelope from the frame's header section.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut r = Reader::new(bytes);
        let env = Self {
            version: r.u8("version")?,
            call_type: r.u8("call_type")?,
            request_id: r.u32("request_id")?,
            ret: r.i32("ret")?,
            func_ret: r.i32("func_ret")?,
            error_msg: r.string_u32("error_msg")?,
            message_type: r.u32("message_type")?,
            trans_info: r.trans_info()?,
            content_type: r.u8("content_type")?,
            content_encoding: r.u8("content_encoding")?,
        };
        Ok(env)
    }
}

/// Extracts the bare method name from a `/app.server.service/method` string.
///
/// Returns `None` unless the string splits on `/` into exactly three
/// segments (the leading empty one included); callers leave the method
/// unset in that case.
#[must_use]
pub fn split_method(func: &str) -> Option<&str> {
    let mut parts = func.split('/');
    let first = parts.next()?;
    let _service = parts.next()?;
    let method = parts.next()?;
    if !first.is_empty() || parts.next().is_some() || method.is_empty() {
        return None;
    }
    Some(method)
}

fn put_str(buf: &mut Vec<u8>, s: &str, field: &'static str) -> Result<(), ProtoError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtoError::FieldTooLong {
        field,
        len: s.len(),
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_bytes_u32(buf: &mut Vec<u8>, b: &[u8], field: &'static str) -> Result<(), ProtoError> {
    let len = u32::try_from(b.len()).map_err(|_| ProtoError::FieldTooLong {
        field,
        len: b.len(),
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(b);
    Ok(())
}

fn put_trans_info(
    buf: &mut Vec<u8>,
    map: &HashMap<String, Vec<u8>>,
) -> Result<(), ProtoError> {
    let count = u16::try_from(map.len()).map_err(|_| ProtoError::FieldTooLong {
        field: "trans_info count",
        len: map.len(),
    })?;
    buf.extend_from_slice(&count.to_be_bytes());
    // Sorted for a deterministic wire image.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        put_str(buf, key, "trans_info key")?;
        put_bytes_u32(buf, &map[key.as_str()], "trans_info value")?;
    }
    Ok(())
}

/// Bounds-checked big-endian field reader over the envelope section.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], ProtoError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ProtoError::Truncated(field))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ProtoError> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, ProtoError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, ProtoError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, ProtoError> {
        let b = self.take(4, field)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, field: &'static str) -> Result<String, ProtoError> {
        let len = self.u16(field)? as usize;
        let b = self.take(len, field)?;
        String::from_utf8(b.to_vec()).map_err(|_| ProtoError::InvalidUtf8(field))
    }

    fn string_u32(&mut self, field: &'static str) -> Result<String, ProtoError> {
        let len = self.u32(field)? as usize;
        let b = self.take(len, field)?;
        String::from_utf8(b.to_vec()).map_err(|_| ProtoError::InvalidUtf8(field))
    }

    fn trans_info(&mut self) -> Result<HashMap<String, Vec<u8>>, ProtoError> {
        let count = self.u16("trans_info count")? as usize;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = self.string("trans_info key")?;
            let len = self.u32("trans_info value")? as usize;
            let value = self.take(len, "trans_info value")?.to_vec();
            map.insert(key, value);
        }
        Ok(map)
    }
}
