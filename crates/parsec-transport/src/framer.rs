//! Stream framing: turns a raw byte stream into complete frames.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use parsec_proto::{FrameHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};

use crate::error::TransportError;

/// Reads self-delimited frames off a connection.
///
/// One framer is bound per connection and reuses a single growable buffer
/// across frames instead of allocating per read. The returned [`Bytes`]
/// is an owned copy, safe to hand to a dispatch task while the buffer is
/// overwritten by the next read.
pub struct Framer {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Framer {
    /// Creates a framer with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a framer with an explicit frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_HEADER_SIZE),
            max_frame_size,
        }
    }

    /// Reads exactly one frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// between frames (zero bytes at the start of the header). A zero-byte
    /// read anywhere else is [`TransportError::UnexpectedEof`]. Length
    /// bounds are validated before any payload byte is read.
    pub async fn read_frame<R>(&mut self, stream: &mut R) -> Result<Option<Bytes>, TransportError>
    where
        R: AsyncRead + Unpin,
    {
        if self.buf.len() < FRAME_HEADER_SIZE {
            self.buf.resize(FRAME_HEADER_SIZE, 0);
        }

        let mut read = 0usize;
        while read < FRAME_HEADER_SIZE {
            let n = stream.read(&mut self.buf[read..FRAME_HEADER_SIZE]).await?;
            if n == 0 {
                if read == 0 {
                    // Idle disconnect, not an error.
                    return Ok(None);
                }
                return Err(TransportError::UnexpectedEof);
            }
            read += n;
        }

        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        header_buf.copy_from_slice(&self.buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&header_buf)?;
        header.validate(self.max_frame_size)?;

        let total = header.total_len as usize;
        if self.buf.len() < total {
            self.buf.resize(total, 0);
        }
        stream
            .read_exact(&mut self.buf[FRAME_HEADER_SIZE..total])
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    TransportError::UnexpectedEof
                } else {
                    TransportError::Io(e)
                }
            })?;

        Ok(Some(Bytes::copy_from_slice(&self.buf[..total])))
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
