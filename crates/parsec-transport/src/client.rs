//! Outbound round trips over TCP and UDP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use parsec_core::config::PoolConfig;
use parsec_proto::{FrameHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};

use crate::error::TransportError;
use crate::framer::Framer;
use crate::pool::ConnectionPool;

/// Maximum UDP datagram we will receive.
const UDP_RECV_BUF: usize = 64 * 1024;

/// Per-call transport options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for the whole round trip.
    pub timeout: Option<Duration>,
    /// Send the request and return without reading a response.
    pub send_only: bool,
    /// Dial a fresh connection instead of using the pool.
    pub disable_pool: bool,
    /// Cancels the call from the outside; surfaced as a distinct
    /// canceled error, never as a timeout.
    pub cancel: Option<CancellationToken>,
}

/// A one-request/one-response exchange with a destination address.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Writes the request frame and reads exactly one response frame.
    ///
    /// Returns `Ok(None)` for send-only calls: a successful send with no
    /// response expected, which callers must not treat as a failure.
    async fn round_trip(
        &self,
        addr: &str,
        frame: Bytes,
        opts: &CallOptions,
    ) -> Result<Option<Bytes>, TransportError>;
}

/// Applies the call deadline and cancellation token around an exchange.
async fn with_call_bounds<F>(opts: &CallOptions, fut: F) -> Result<Option<Bytes>, TransportError>
where
    F: std::future::Future<Output = Result<Option<Bytes>, TransportError>>,
{
    let bounded = async {
        match &opts.cancel {
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => Err(TransportError::Canceled),
                    result = fut => result,
                }
            }
            None => fut.await,
        }
    };
    match opts.timeout {
        Some(deadline) => timeout(deadline, bounded)
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => bounded.await,
    }
}

/// TCP round-trip strategy backed by the connection pool.
pub struct TcpClientTransport {
    pool: Arc<ConnectionPool>,
    dial_timeout: Duration,
    max_frame_size: usize,
}

impl TcpClientTransport {
    /// Creates a transport with its own connection pool.
    #[must_use]
    pub fn new(pool_config: PoolConfig) -> Self {
        Self::with_max_frame_size(pool_config, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a transport with an explicit frame size limit.
    #[must_use]
    pub fn with_max_frame_size(pool_config: PoolConfig, max_frame_size: usize) -> Self {
        let dial_timeout = pool_config.dial_timeout;
        Self {
            pool: ConnectionPool::new(pool_config),
            dial_timeout,
            max_frame_size,
        }
    }

    /// The transport's connection pool, for shutdown and inspection.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    async fn exchange(
        &self,
        addr: &str,
        frame: &Bytes,
        send_only: bool,
        disable_pool: bool,
    ) -> Result<Option<Bytes>, TransportError> {
        if disable_pool {
            let mut stream = timeout(self.dial_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| TransportError::ConnectFailed(format!("dial {addr} timed out")))?
                .map_err(|e| TransportError::ConnectFailed(format!("dial {addr}: {e}")))?;
            return exchange_on(&mut stream, frame, send_only, self.max_frame_size).await;
        }

        let mut conn = self.pool.get(addr).await?;
        let result = exchange_on(conn.stream_mut(), frame, send_only, self.max_frame_size).await;
        // The guard recycles only once the exchange completed cleanly. A
        // deadline or cancellation drops this future before it gets here,
        // leaving the connection marked dirty with its late response still
        // in flight, so the pool closes it instead of handing it out again.
        if result.is_ok() {
            conn.mark_reusable();
        }
        result
    }
}

async fn exchange_on(
    stream: &mut TcpStream,
    frame: &Bytes,
    send_only: bool,
    max_frame_size: usize,
) -> Result<Option<Bytes>, TransportError> {
    stream.write_all(frame).await?;
    stream.flush().await?;

    if send_only {
        debug!("send-only request written, skipping response read");
        return Ok(None);
    }

    let mut framer = Framer::with_max_frame_size(max_frame_size);
    match framer.read_frame(stream).await? {
        Some(rsp) => Ok(Some(rsp)),
        // The peer closed instead of responding.
        None => Err(TransportError::UnexpectedEof),
    }
}

#[async_trait]
impl ClientTransport for TcpClientTransport {
    async fn round_trip(
        &self,
        addr: &str,
        frame: Bytes,
        opts: &CallOptions,
    ) -> Result<Option<Bytes>, TransportError> {
        with_call_bounds(
            opts,
            self.exchange(addr, &frame, opts.send_only, opts.disable_pool),
        )
        .await
    }
}

/// UDP round-trip strategy.
///
/// In connected mode the socket is connected to the destination and the
/// kernel filters replies from other sources; in unconnected mode a reply
/// from any source address is accepted.
pub struct UdpClientTransport {
    connected: bool,
    max_frame_size: usize,
}

impl UdpClientTransport {
    /// Creates a transport in the given connection mode.
    #[must_use]
    pub fn new(connected: bool) -> Self {
        Self {
            connected,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    async fn exchange(
        &self,
        addr: &str,
        frame: &Bytes,
        send_only: bool,
    ) -> Result<Option<Bytes>, TransportError> {
        let target = lookup_host(addr)
            .await
            .map_err(|e| TransportError::InvalidAddress(format!("{addr}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::InvalidAddress(addr.to_owned()))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;

        if self.connected {
            socket.connect(target).await?;
            socket.send(frame).await?;
        } else {
            socket.send_to(frame, target).await?;
        }

        if send_only {
            return Ok(None);
        }

        let mut buf = vec![0u8; UDP_RECV_BUF];
        let len = if self.connected {
            socket.recv(&mut buf).await?
        } else {
            let (len, _peer) = socket.recv_from(&mut buf).await?;
            len
        };

        let frame = trim_datagram(&buf[..len], self.max_frame_size)?;
        Ok(Some(frame))
    }
}

/// Validates a datagram as one complete frame and trims trailing bytes.
fn trim_datagram(datagram: &[u8], max_frame_size: usize) -> Result<Bytes, TransportError> {
    if datagram.len() < FRAME_HEADER_SIZE {
        return Err(TransportError::UnexpectedEof);
    }
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];
    header_buf.copy_from_slice(&datagram[..FRAME_HEADER_SIZE]);
    let header = FrameHeader::decode(&header_buf)?;
    header.validate(max_frame_size)?;
    let total = header.total_len as usize;
    if datagram.len() < total {
        return Err(TransportError::UnexpectedEof);
    }
    Ok(Bytes::copy_from_slice(&datagram[..total]))
}

#[async_trait]
impl ClientTransport for UdpClientTransport {
    async fn round_trip(
        &self,
        addr: &str,
        frame: Bytes,
        opts: &CallOptions,
    ) -> Result<Option<Bytes>, TransportError> {
        with_call_bounds(opts, self.exchange(addr, &frame, opts.send_only)).await
    }
}
