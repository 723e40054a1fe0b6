//! Fixed-size frame header encoding and decoding.

use crate::error::ProtoError;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Protocol magic carried in the first two bytes of every frame.
pub const PROTOCOL_MAGIC: u16 = 0x930;

/// Default maximum frame size (10 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Data frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FrameType {
    /// Request/response frame.
    #[default]
    Unary = 0,
    /// Streaming frame.
    Stream = 1,
}

impl FrameType {
    /// Creates a frame type from a numeric value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unary),
            1 => Some(Self::Stream),
            _ => None,
        }
    }
}

/// Fixed frame header preceding every wire message.
///
/// Wire format (16 bytes, big-endian):
/// - Bytes 0-1: magic (0x930)
/// - Byte 2: data frame type
/// - Byte 3: stream frame type
/// - Bytes 4-7: total frame length, header included (u32)
/// - Bytes 8-9: envelope section length (u16)
/// - Bytes 10-13: stream id (u32)
/// - Bytes 14-15: reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    /// Data frame type.
    pub frame_type: u8,
    /// Stream frame type (zero for unary frames).
    pub stream_frame_type: u8,
    /// Total frame length including this header and the envelope section.
    pub total_len: u32,
    /// Length of the envelope section following this header.
    pub header_len: u16,
    /// Stream id (zero for unary frames).
    pub stream_id: u32,
}

impl FrameHeader {
    /// Creates a unary frame header for the given envelope and body sizes.
    #[must_use]
    pub fn unary(header_len: u16, body_len: usize) -> Self {
        Self {
            frame_type: FrameType::Unary as u8,
            stream_frame_type: 0,
            total_len: (FRAME_HEADER_SIZE + header_len as usize + body_len) as u32,
            header_len,
            stream_id: 0,
        }
    }

    /// Encodes the frame header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..2].copy_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
        buf[2] = self.frame_type;
        buf[3] = self.stream_frame_type;
        buf[4..8].copy_from_slice(&self.total_len.to_be_bytes());
        buf[8..10].copy_from_slice(&self.header_len.to_be_bytes());
        buf[10..14].copy_from_slice(&self.stream_id.to_be_bytes());
        buf
    }

    /// Decodes a frame header from bytes, validating the magic.
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, ProtoError> {
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != PROTOCOL_MAGIC {
            return Err(ProtoError::BadMagic(magic));
        }

        Ok(Self {
            frame_type: bytes[2],
            stream_frame_type: bytes[3],
            total_len: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            header_len: u16::from_be_bytes([bytes[8], bytes[9]]),
            stream_id: u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        })
    }

    /// Validates the declared lengths against the configured maximum.
    ///
    /// Rejects frames before any payload byte is read, so a corrupt or
    /// hostile peer cannot force an unbounded allocation.
    pub fn validate(&self, max_frame_size: usize) -> Result<(), ProtoError> {
        let total = self.total_len as usize;
        let header = FRAME_HEADER_SIZE + self.header_len as usize;
        // An empty body is legal (error replies, bodyless calls).
        if total < header {
            return Err(ProtoError::FrameTooShort { total, header });
        }
        if total > max_frame_size {
            return Err(ProtoError::FrameTooLarge {
                size: total,
                max: max_frame_size,
            });
        }
        Ok(())
    }

    /// Length of the body following the envelope section.
    #[must_use]
    pub fn body_len(&self) -> usize {
        (self.total_len as usize).saturating_sub(FRAME_HEADER_SIZE + self.header_len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::unary(64, 1024);
        let bytes = header.encode();
        let decoded = FrameHeader::decode(&bytes).unwrap();

        assert_eq!(decoded, header);
        assert_eq!(decoded.total_len as usize, FRAME_HEADER_SIZE + 64 + 1024);
        assert_eq!(decoded.body_len(), 1024);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = FrameHeader::unary(8, 8).encode();
        bytes[0] = 0xff;
        assert!(matches!(
            FrameHeader::decode(&bytes),
            Err(ProtoError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_length_shorter_than_headers() {
        let header = FrameHeader {
            frame_type: 0,
            stream_frame_type: 0,
            total_len: 20,
            header_len: 10,
            stream_id: 0,
        };
        assert!(matches!(
            header.validate(DEFAULT_MAX_FRAME_SIZE),
            Err(ProtoError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let header = FrameHeader::unary(16, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(
            header.validate(DEFAULT_MAX_FRAME_SIZE),
            Err(ProtoError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn frame_type_from_u8() {
        assert_eq!(FrameType::from_u8(0), Some(FrameType::Unary));
        assert_eq!(FrameType::from_u8(1), Some(FrameType::Stream));
        assert_eq!(FrameType::from_u8(7), None);
    }
}
