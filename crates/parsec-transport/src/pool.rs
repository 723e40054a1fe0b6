//! Per-address connection pooling.
//!
//! Each destination address owns an endpoint pool with a LIFO idle stack:
//! under bursty-but-uniform load the same few connections cycle while the
//! rest age out, instead of the whole set staying marked active. A
//! background checker per endpoint evicts idle/lifetime-expired
//! connections and probes liveness with a non-blocking one-byte read.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::timeout;
use tracing::{debug, warn};

use parsec_core::config::PoolConfig;

use crate::error::TransportError;

/// Pool of persistent connections keyed by destination address.
pub struct ConnectionPool {
    endpoints: DashMap<String, Arc<EndpointPool>>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Creates a pool; endpoint pools are created lazily on first use.
    #[must_use]
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
            config,
        })
    }

    /// Checks out a connection to `addr`, dialing on a pool miss.
    ///
    /// The returned guard starts non-reusable: its drop closes the
    /// connection unless [`PooledConn::mark_reusable`] was called after a
    /// clean exchange. A guard dropped mid-call (deadline, cancellation)
    /// may still have a response in flight and must never be recycled.
    pub async fn get(&self, addr: &str) -> Result<PooledConn, TransportError> {
        // entry() is a load-or-store: two racing callers cannot create
        // two pools for one address.
        let endpoint = self
            .endpoints
            .entry(addr.to_owned())
            .or_insert_with(|| EndpointPool::spawn(addr.to_owned(), self.config.clone()))
            .clone();
        endpoint.get().await
    }

    /// Shuts down every endpoint pool; queued waiters fail immediately.
    pub fn close(&self) {
        for entry in self.endpoints.iter() {
            entry.value().close();
        }
    }

    /// Runs one health-checker pass over every endpoint immediately.
    ///
    /// The background checkers run on their own interval; this exists for
    /// deterministic eviction in tests and administrative tooling.
    pub fn run_health_check(&self) {
        for entry in self.endpoints.iter() {
            entry.value().health_check();
        }
    }

    /// Number of dials performed for `addr` so far.
    #[must_use]
    pub fn dial_count(&self, addr: &str) -> usize {
        self.endpoints
            .get(addr)
            .map_or(0, |e| e.dials.load(Ordering::Relaxed))
    }

    /// Number of idle connections currently pooled for `addr`.
    #[must_use]
    pub fn idle_count(&self, addr: &str) -> usize {
        self.endpoints
            .get(addr)
            .map_or(0, |e| e.idle.lock().map(|idle| idle.len()).unwrap_or(0))
    }
}

struct IdleConn {
    stream: TcpStream,
    created: Instant,
    idled: Instant,
}

/// Pool state for a single destination address.
struct EndpointPool {
    addr: String,
    config: PoolConfig,
    /// LIFO stack of idle connections.
    idle: Mutex<Vec<IdleConn>>,
    /// Present when `max_active` > 0; sized to `max_active`.
    semaphore: Option<Arc<Semaphore>>,
    active: AtomicUsize,
    closed: AtomicBool,
    dials: AtomicUsize,
}

impl EndpointPool {
    fn spawn(addr: String, config: PoolConfig) -> Arc<Self> {
        let semaphore = (config.max_active > 0)
            .then(|| Arc::new(Semaphore::new(config.max_active)));
        let interval = config.check_interval;
        let pool = Arc::new(Self {
            addr,
            config,
            idle: Mutex::new(Vec::new()),
            semaphore,
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            dials: AtomicUsize::new(0),
        });
        tokio::spawn(health_check_loop(Arc::downgrade(&pool), interval));
        pool
    }

    async fn get(self: &Arc<Self>) -> Result<PooledConn, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::PoolClosed);
        }

        let permit = match &self.semaphore {
            Some(sem) if self.config.wait => {
                Some(
                    Arc::clone(sem)
                        .acquire_owned()
                        .await
                        .map_err(|_| TransportError::PoolClosed)?,
                )
            }
            Some(sem) => Some(Arc::clone(sem).try_acquire_owned().map_err(|e| match e {
                TryAcquireError::Closed => TransportError::PoolClosed,
                TryAcquireError::NoPermits => TransportError::PoolLimit,
            })?),
            None => None,
        };

        // Pop idle connections newest-first, discarding stale ones.
        loop {
            let candidate = self.idle.lock().ok().and_then(|mut idle| idle.pop());
            match candidate {
                Some(conn) if !self.expired(&conn) => {
                    self.active.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledConn {
                        stream: Some(conn.stream),
                        created: conn.created,
                        pool: Arc::clone(self),
                        _permit: permit,
                        reusable: false,
                    });
                }
                Some(conn) => {
                    debug!(addr = %self.addr, "dropping stale idle connection");
                    drop(conn);
                }
                None => break,
            }
        }

        // Pool miss: dial. A failure drops the permit, returning the slot
        // to any waiter.
        self.dials.fetch_add(1, Ordering::Relaxed);
        let stream = timeout(self.config.dial_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                TransportError::ConnectFailed(format!("dial {} timed out", self.addr))
            })?
            .map_err(|e| TransportError::ConnectFailed(format!("dial {}: {e}", self.addr)))?;
        let _ = stream.set_nodelay(true);

        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConn {
            stream: Some(stream),
            created: Instant::now(),
            pool: Arc::clone(self),
            _permit: permit,
            reusable: false,
        })
    }

    fn expired(&self, conn: &IdleConn) -> bool {
        let idle_timeout = self.config.idle_timeout;
        if idle_timeout > Duration::ZERO && conn.idled.elapsed() > idle_timeout {
            return true;
        }
        let lifetime = self.config.max_conn_lifetime;
        lifetime > Duration::ZERO && conn.created.elapsed() > lifetime
    }

    fn recycle(&self, stream: TcpStream, created: Instant) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() >= self.config.max_idle {
                // Excess idle connections are closed on return.
                return;
            }
            idle.push(IdleConn {
                stream,
                created,
                idled: Instant::now(),
            });
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(sem) = &self.semaphore {
            sem.close();
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }

    /// One eviction pass over the idle stack.
    fn health_check(&self) {
        let Ok(mut idle) = self.idle.lock() else {
            return;
        };
        idle.retain(|conn| {
            if self.expired(conn) {
                debug!(addr = %self.addr, "evicting expired idle connection");
                return false;
            }
            // An idle connection must have nothing to read: available
            // data means protocol desync, zero bytes means the peer
            // closed it. Both are fatal to the connection.
            let mut probe = [0u8; 1];
            match conn.stream.try_read(&mut probe) {
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
                Ok(0) => {
                    debug!(addr = %self.addr, "evicting peer-closed idle connection");
                    false
                }
                Ok(_) => {
                    warn!(addr = %self.addr, "idle connection had pending data, evicting");
                    false
                }
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "evicting broken idle connection");
                    false
                }
            }
        });
    }
}

async fn health_check_loop(pool: Weak<EndpointPool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(pool) = pool.upgrade() else {
            return;
        };
        if pool.closed.load(Ordering::Acquire) {
            return;
        }
        pool.health_check();
    }
}

/// A checked-out pooled connection.
///
/// The guard starts dirty: dropping it closes the connection. Only after
/// [`PooledConn::mark_reusable`] does drop return the connection to the
/// idle stack, so a guard abandoned mid-exchange — a deadline or
/// cancellation dropping the call future — can never leak a stale
/// in-flight response to the next checkout.
pub struct PooledConn {
    stream: Option<TcpStream>,
    created: Instant,
    pool: Arc<EndpointPool>,
    _permit: Option<OwnedSemaphorePermit>,
    reusable: bool,
}

impl PooledConn {
    /// The underlying stream.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("stream taken")
    }

    /// Marks the connection clean for recycling on drop.
    ///
    /// Call only after a complete exchange: the request fully written and
    /// the response fully read (or, for send-only calls, no response
    /// expected).
    pub fn mark_reusable(&mut self) {
        self.reusable = true;
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("addr", &self.pool.addr)
            .field("reusable", &self.reusable)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::Relaxed);
        if let Some(stream) = self.stream.take() {
            if self.reusable {
                self.pool.recycle(stream, self.created);
            }
        }
    }
}
