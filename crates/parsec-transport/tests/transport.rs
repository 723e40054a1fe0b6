//! End-to-end transport tests over real sockets on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use parsec_core::config::{PoolConfig, ServerConfig};
use parsec_proto::{FrameHeader, FRAME_HEADER_SIZE};
use parsec_transport::{
    CallOptions, ClientTransport, ConnectionPool, FrameHandler, TcpClientTransport,
    TcpServerTransport, TransportError, UdpClientTransport, UdpServerTransport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn frame_with_body(body: &[u8]) -> Bytes {
    let header = FrameHeader::unary(0, body.len());
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(body);
    Bytes::from(frame)
}

/// Echoes every frame back unchanged.
struct EchoHandler;

#[async_trait]
impl FrameHandler for EchoHandler {
    async fn handle_frame(&self, frame: Bytes, _remote: SocketAddr) -> Option<Bytes> {
        Some(frame)
    }
}

/// Swallows every frame without responding.
struct SilentHandler;

#[async_trait]
impl FrameHandler for SilentHandler {
    async fn handle_frame(&self, _frame: Bytes, _remote: SocketAddr) -> Option<Bytes> {
        None
    }
}

/// Echoes after a fixed delay, long enough to outlive a short deadline.
struct SlowEchoHandler(Duration);

#[async_trait]
impl FrameHandler for SlowEchoHandler {
    async fn handle_frame(&self, frame: Bytes, _remote: SocketAddr) -> Option<Bytes> {
        tokio::time::sleep(self.0).await;
        Some(frame)
    }
}

async fn spawn_tcp_echo(config: ServerConfig) -> (SocketAddr, CancellationToken) {
    init_tracing();
    let cancel = CancellationToken::new();
    let addr = TcpServerTransport::new(config)
        .listen_and_serve(Arc::new(EchoHandler), cancel.clone())
        .await
        .unwrap();
    (addr, cancel)
}

#[tokio::test]
async fn tcp_round_trip_echoes_frame() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;

    let transport = TcpClientTransport::new(PoolConfig::default());
    let request = frame_with_body(b"hello over tcp");
    let response = transport
        .round_trip(&addr.to_string(), request.clone(), &CallOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, request);

    cancel.cancel();
}

#[tokio::test]
async fn tcp_sync_dispatch_round_trip() {
    let config = ServerConfig {
        async_dispatch: false,
        ..ServerConfig::default()
    };
    let (addr, cancel) = spawn_tcp_echo(config).await;

    let transport = TcpClientTransport::new(PoolConfig::default());
    let request = frame_with_body(b"serial");
    let response = transport
        .round_trip(&addr.to_string(), request.clone(), &CallOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, request);

    cancel.cancel();
}

#[tokio::test]
async fn send_only_returns_without_response() {
    init_tracing();
    let cancel = CancellationToken::new();
    let addr = TcpServerTransport::new(ServerConfig::default())
        .listen_and_serve(Arc::new(SilentHandler), cancel.clone())
        .await
        .unwrap();

    let transport = TcpClientTransport::new(PoolConfig::default());
    let opts = CallOptions {
        send_only: true,
        ..CallOptions::default()
    };
    let result = transport
        .round_trip(&addr.to_string(), frame_with_body(b"fire and forget"), &opts)
        .await
        .unwrap();
    assert!(result.is_none());

    cancel.cancel();
}

#[tokio::test]
async fn round_trip_times_out_against_silent_server() {
    init_tracing();
    let cancel = CancellationToken::new();
    let addr = TcpServerTransport::new(ServerConfig::default())
        .listen_and_serve(Arc::new(SilentHandler), cancel.clone())
        .await
        .unwrap();

    let transport = TcpClientTransport::new(PoolConfig::default());
    let opts = CallOptions {
        timeout: Some(Duration::from_millis(50)),
        ..CallOptions::default()
    };
    let err = transport
        .round_trip(&addr.to_string(), frame_with_body(b"no reply"), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout));

    cancel.cancel();
}

#[tokio::test]
async fn canceled_token_is_not_a_timeout() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;

    let token = CancellationToken::new();
    token.cancel();
    let transport = TcpClientTransport::new(PoolConfig::default());
    let opts = CallOptions {
        timeout: Some(Duration::from_secs(5)),
        cancel: Some(token),
        ..CallOptions::default()
    };
    let err = transport
        .round_trip(&addr.to_string(), frame_with_body(b"canceled"), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Canceled));

    cancel.cancel();
}

#[tokio::test]
async fn pool_reuses_one_connection_for_sequential_calls() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;
    let addr = addr.to_string();

    let transport = TcpClientTransport::new(PoolConfig::default());
    for i in 0..5u8 {
        let request = frame_with_body(&[i; 8]);
        let response = transport
            .round_trip(&addr, request.clone(), &CallOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response, request);
    }
    // Each call returned its connection before the next began.
    assert_eq!(transport.pool().dial_count(&addr), 1);
    assert_eq!(transport.pool().idle_count(&addr), 1);

    cancel.cancel();
}

#[tokio::test]
async fn timed_out_call_does_not_recycle_its_connection() {
    init_tracing();
    let cancel = CancellationToken::new();
    let addr = TcpServerTransport::new(ServerConfig::default())
        .listen_and_serve(
            Arc::new(SlowEchoHandler(Duration::from_millis(200))),
            cancel.clone(),
        )
        .await
        .unwrap();
    let addr = addr.to_string();

    let transport = TcpClientTransport::new(PoolConfig::default());
    let opts = CallOptions {
        timeout: Some(Duration::from_millis(30)),
        ..CallOptions::default()
    };
    let err = transport
        .round_trip(&addr, frame_with_body(b"AAAA"), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout));
    // The abandoned connection still has the late echo in flight; it must
    // be closed, not parked for the next checkout.
    assert_eq!(transport.pool().idle_count(&addr), 0);

    // Give the server time to write the late first echo, then verify the
    // follow-up call reads its own response, not the stale one.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let request = frame_with_body(b"BBBB");
    let response = transport
        .round_trip(&addr, request.clone(), &CallOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, request);
    assert_eq!(transport.pool().dial_count(&addr), 2);

    cancel.cancel();
}

#[tokio::test]
async fn disable_pool_dials_per_call() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;
    let addr = addr.to_string();

    let transport = TcpClientTransport::new(PoolConfig::default());
    let opts = CallOptions {
        disable_pool: true,
        ..CallOptions::default()
    };
    for _ in 0..2 {
        transport
            .round_trip(&addr, frame_with_body(b"ad hoc"), &opts)
            .await
            .unwrap();
    }
    assert_eq!(transport.pool().dial_count(&addr), 0);

    cancel.cancel();
}

#[tokio::test]
async fn pool_fails_fast_at_active_limit() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;
    let addr = addr.to_string();

    let config = PoolConfig {
        max_active: 1,
        wait: false,
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(config);
    let held = pool.get(&addr).await.unwrap();
    let err = pool.get(&addr).await.unwrap_err();
    assert!(matches!(err, TransportError::PoolLimit));
    drop(held);

    // The slot freed by the drop is reusable.
    pool.get(&addr).await.unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn pool_wait_blocks_until_a_slot_frees() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;
    let addr = addr.to_string();

    let config = PoolConfig {
        max_active: 1,
        wait: true,
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(config);
    let held = pool.get(&addr).await.unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        let addr = addr.clone();
        tokio::spawn(async move { pool.get(&addr).await.map(|_| ()) })
    };
    // The waiter must still be queued while the slot is held.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(held);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn health_check_evicts_idle_expired_connections() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;
    let addr = addr.to_string();

    let config = PoolConfig {
        idle_timeout: Duration::from_millis(50),
        check_interval: Duration::from_secs(3600),
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(config);
    let mut conn = pool.get(&addr).await.unwrap();
    conn.mark_reusable();
    drop(conn);
    assert_eq!(pool.idle_count(&addr), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.run_health_check();
    assert_eq!(pool.idle_count(&addr), 0);

    // The next checkout dials fresh.
    drop(pool.get(&addr).await.unwrap());
    assert_eq!(pool.dial_count(&addr), 2);

    cancel.cancel();
}

#[tokio::test]
async fn closed_pool_rejects_checkouts() {
    let (addr, cancel) = spawn_tcp_echo(ServerConfig::default()).await;
    let addr = addr.to_string();

    let pool = ConnectionPool::new(PoolConfig::default());
    drop(pool.get(&addr).await.unwrap());
    pool.close();
    assert!(matches!(
        pool.get(&addr).await.unwrap_err(),
        TransportError::PoolClosed
    ));

    cancel.cancel();
}

#[tokio::test]
async fn udp_round_trip_echoes_frame() {
    init_tracing();
    let cancel = CancellationToken::new();
    let config = ServerConfig {
        network: "udp".into(),
        udp_listeners: 2,
        ..ServerConfig::default()
    };
    let addr = UdpServerTransport::new(config)
        .listen_and_serve(Arc::new(EchoHandler), cancel.clone())
        .await
        .unwrap();

    for connected in [true, false] {
        let transport = UdpClientTransport::new(connected);
        let request = frame_with_body(b"hello over udp");
        let response = transport
            .round_trip(&addr.to_string(), request.clone(), &CallOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response, request);
    }

    cancel.cancel();
}
