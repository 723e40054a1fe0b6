//! Client and server envelope codecs.
//!
//! A codec turns a complete frame (as produced by the transport framer)
//! into an envelope plus opaque body bytes, and back. The codecs are
//! immutable and shared; the client codec carries only an atomic sequence
//! for request-id assignment.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::ProtoError;
use crate::frame::{FrameHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};

/// A decoded inbound request: envelope, body, and a pre-populated
/// response skeleton so the encode path only fills error fields.
#[derive(Debug)]
pub struct DecodedRequest {
    /// The parsed request envelope.
    pub envelope: RequestEnvelope,
    /// The opaque body bytes following the envelope section.
    pub body: Bytes,
    /// Response envelope with identity fields already copied.
    pub reply: ResponseEnvelope,
}

/// Server-side envelope codec.
#[derive(Debug)]
pub struct ServerCodec {
    max_frame_size: usize,
}

impl ServerCodec {
    /// Creates a codec with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a codec with an explicit frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Decodes a complete request frame.
    pub fn decode_request(&self, frame: &Bytes) -> Result<DecodedRequest, ProtoError> {
        let (header, envelope_bytes, body) = split_frame(frame, self.max_frame_size)?;
        let _ = header;
        let envelope = RequestEnvelope::decode(envelope_bytes)?;
        let reply = ResponseEnvelope::reply_to(&envelope);
        Ok(DecodedRequest {
            envelope,
            body,
            reply,
        })
    }

    /// Assembles a complete response frame around the body bytes.
    pub fn encode_response(
        &self,
        envelope: &ResponseEnvelope,
        body: &[u8],
    ) -> Result<Vec<u8>, ProtoError> {
        assemble(
            |buf| envelope.encode_into(buf),
            body,
            self.max_frame_size,
        )
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side envelope codec.
///
/// Assigns monotonically increasing request ids when the caller left the
/// id unset, and verifies the response echoes the id it sent.
#[derive(Debug)]
pub struct ClientCodec {
    seq: AtomicU32,
    max_frame_size: usize,
}

impl ClientCodec {
    /// Creates a codec with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a codec with an explicit frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            seq: AtomicU32::new(1),
            max_frame_size,
        }
    }

    /// Encodes a request frame, assigning a request id if unset.
    ///
    /// Returns the assigned request id alongside the frame bytes.
    pub fn encode_request(
        &self,
        envelope: &mut RequestEnvelope,
        body: &[u8],
    ) -> Result<(u32, Vec<u8>), ProtoError> {
        if envelope.request_id == 0 {
            envelope.request_id = self.next_request_id();
        }
        let frame = assemble(
            |buf| envelope.encode_into(buf),
            body,
            self.max_frame_size,
        )?;
        Ok((envelope.request_id, frame))
    }

    /// Decodes a complete response frame, verifying the request id echo.
    pub fn decode_response(
        &self,
        frame: &Bytes,
        sent_request_id: u32,
    ) -> Result<(ResponseEnvelope, Bytes), ProtoError> {
        let (_, envelope_bytes, body) = split_frame(frame, self.max_frame_size)?;
        let envelope = ResponseEnvelope::decode(envelope_bytes)?;
        if envelope.request_id != sent_request_id {
            return Err(ProtoError::RequestIdMismatch {
                sent: sent_request_id,
                received: envelope.request_id,
            });
        }
        Ok((envelope, body))
    }

    fn next_request_id(&self) -> u32 {
        // Skip 0: it means "unassigned" on the wire.
        loop {
            let id = self.seq.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a complete frame into header, envelope section and body.
fn split_frame(
    frame: &Bytes,
    max_frame_size: usize,
) -> Result<(FrameHeader, &[u8], Bytes), ProtoError> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(ProtoError::Truncated("frame header"));
    }
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    header_buf.copy_from_slice(&frame[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::decode(&header_buf)?;
    header.validate(max_frame_size)?;

    let envelope_end = FRAME_HEADER_SIZE + header.header_len as usize;
    if frame.len() < header.total_len as usize || envelope_end > frame.len() {
        return Err(ProtoError::Truncated("frame payload"));
    }
    let envelope_bytes = &frame[FRAME_HEADER_SIZE..envelope_end];
    let body = frame.slice(envelope_end..header.total_len as usize);
    Ok((header, envelope_bytes, body))
}

/// Assembles `[frame header][envelope][body]` with the total length
/// recomputed from the encoded envelope size.
fn assemble(
    encode_envelope: impl FnOnce(&mut Vec<u8>) -> Result<(), ProtoError>,
    body: &[u8],
    max_frame_size: usize,
) -> Result<Vec<u8>, ProtoError> {
    let mut envelope = Vec::with_capacity(128);
    encode_envelope(&mut envelope)?;

    // The frame header carries the envelope length as a u16; an envelope
    // past that bound (every field individually in range, u32-prefixed
    // values included) would wrap into an undecodable frame.
    let header_len = u16::try_from(envelope.len()).map_err(|_| ProtoError::FieldTooLong {
        field: "envelope section",
        len: envelope.len(),
    })?;

    let total = FRAME_HEADER_SIZE + envelope.len() + body.len();
    if total > max_frame_size {
        return Err(ProtoError::FrameTooLarge {
            size: total,
            max: max_frame_size,
        });
    }

    let header = FrameHeader::unary(header_len, body.len());
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&envelope);
    frame.extend_from_slice(body);
    Ok(frame)
}
