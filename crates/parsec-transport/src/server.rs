//! Inbound transports: TCP accept loop and UDP receive fan-out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parsec_core::config::ServerConfig;

use crate::error::TransportError;
use crate::framer::Framer;

/// Initial backoff after a failed accept.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Backoff ceiling for repeated accept failures.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Maximum UDP datagram we will receive.
const UDP_RECV_BUF: usize = 64 * 1024;

/// Handles one decoded frame, producing an optional response frame.
///
/// Returning `None` suppresses the response write (one-way calls).
/// Implementations own panic containment; a panic that does escape kills
/// only the task serving that request or connection.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Processes a complete request frame.
    async fn handle_frame(&self, frame: Bytes, remote: SocketAddr) -> Option<Bytes>;
}

/// TCP server transport: accept loop plus per-connection serve loops.
pub struct TcpServerTransport {
    config: ServerConfig,
}

impl TcpServerTransport {
    /// Creates a transport from server configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Binds, spawns the accept loop in the background, and returns the
    /// bound address once listening has succeeded.
    pub async fn listen_and_serve(
        &self,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        let local = listener.local_addr()?;
        info!(address = %local, "TCP server transport listening");

        let config = self.config.clone();
        tokio::spawn(accept_loop(listener, handler, config, cancel));
        Ok(local)
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn FrameHandler>,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    let mut backoff = ACCEPT_BACKOFF_MIN;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("accept loop shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    let _ = stream.set_nodelay(true);
                    debug!(%remote, "connection accepted");
                    let handler = Arc::clone(&handler);
                    let config = config.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(serve_conn(stream, remote, handler, config, cancel));
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64,
                        "accept failed, backing off");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                }
            }
        }
    }
}

/// Serves one connection until clean EOF, idle timeout, protocol error
/// or shutdown. A failure here terminates this connection only.
async fn serve_conn(
    stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn FrameHandler>,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let mut framer = Framer::with_max_frame_size(config.max_frame_size);

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return,
            read = timeout(config.idle_timeout, framer.read_frame(&mut reader)) => read,
        };

        let frame = match read {
            Err(_) => {
                debug!(%remote, "connection idle timeout");
                return;
            }
            Ok(Ok(None)) => {
                debug!(%remote, "connection closed by peer");
                return;
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Err(e)) => {
                warn!(%remote, error = %e, "frame read failed, closing connection");
                return;
            }
        };

        if config.async_dispatch {
            // The framer's Bytes is already an owned copy, so the shared
            // read buffer can be overwritten by the next read while this
            // request is in flight.
            let handler = Arc::clone(&handler);
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                if let Some(rsp) = handler.handle_frame(frame, remote).await {
                    write_response(&writer, &rsp, remote).await;
                }
            });
        } else if let Some(rsp) = handler.handle_frame(frame, remote).await {
            if !try_write_response(&writer, &rsp, remote).await {
                return;
            }
        }
    }
}

async fn write_response(writer: &Arc<Mutex<OwnedWriteHalf>>, rsp: &[u8], remote: SocketAddr) {
    try_write_response(writer, rsp, remote).await;
}

async fn try_write_response(
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    rsp: &[u8],
    remote: SocketAddr,
) -> bool {
    let mut writer = writer.lock().await;
    if let Err(e) = write_all_flush(&mut *writer, rsp).await {
        warn!(%remote, error = %e, "response write failed");
        return false;
    }
    true
}

async fn write_all_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// UDP server transport: N receive tasks over one shared socket, one
/// task per datagram.
pub struct UdpServerTransport {
    config: ServerConfig,
}

impl UdpServerTransport {
    /// Creates a transport from server configuration.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Binds, spawns the receive loops in the background, and returns the
    /// bound address once listening has succeeded.
    pub async fn listen_and_serve(
        &self,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> Result<SocketAddr, TransportError> {
        let socket = Arc::new(UdpSocket::bind(&self.config.bind).await?);
        let local = socket.local_addr()?;

        let listeners = if self.config.udp_listeners == 0 {
            std::thread::available_parallelism().map_or(1, |p| p.get())
        } else {
            self.config.udp_listeners
        };
        info!(address = %local, listeners, "UDP server transport listening");

        for _ in 0..listeners {
            tokio::spawn(recv_loop(
                Arc::clone(&socket),
                Arc::clone(&handler),
                cancel.clone(),
            ));
        }
        Ok(local)
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn FrameHandler>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; UDP_RECV_BUF];
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return,
            received = socket.recv_from(&mut buf) => received,
        };
        match received {
            Ok((len, peer)) => {
                let frame = Bytes::copy_from_slice(&buf[..len]);
                let handler = Arc::clone(&handler);
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    if let Some(rsp) = handler.handle_frame(frame, peer).await {
                        if let Err(e) = socket.send_to(&rsp, peer).await {
                            warn!(%peer, error = %e, "datagram response send failed");
                        }
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "datagram receive failed");
            }
        }
    }
}
