//! Keyed connection pool.
//!
//! Connections are grouped by [`PoolKey`]. An acquisition reuses an idle
//! connection of its key, establishes a new one when the global and per-key
//! bounds allow it, or queues behind earlier acquisitions of the same key.
//! Queued acquisitions are served strictly in arrival order.

mod connection;
mod key;
mod state;

pub use connection::{ConnState, Connection};
pub(crate) use connection::switches_protocol;
pub use key::{PoolKey, Scheme};

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use tokio::runtime::Handle;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfig;
use crate::error::ClientError;
use crate::happy_eyeballs;
use crate::resolver::{GaiResolver, Resolve, ResolverCache};
use crate::transport::{Connect, NoTls, TcpConnector, TlsConnect};

use state::{Grant, Limits, PoolState};

/// Point-in-time counters of a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, idle ones and those being established included.
    pub total: usize,
    pub idle: usize,
    /// Acquisitions queued for capacity.
    pub waiting: usize,
}

/// Shared handle to a connection pool; clones refer to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    limits: Limits,
    resolver: ResolverCache,
    connector: Arc<dyn Connect>,
    tls: Option<Arc<dyn TlsConnect>>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

enum Step {
    Reuse(Connection),
    Connect,
    Wait(u64, oneshot::Receiver<Grant>),
}

impl Pool {
    /// Creates a pool over plain TCP and the system resolver.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_parts(config, Arc::new(GaiResolver), Arc::new(TcpConnector::new()), None)
    }

    pub fn with_parts(
        config: PoolConfig,
        resolver: Arc<dyn Resolve>,
        connector: Arc<dyn Connect>,
        tls: Option<Arc<dyn TlsConnect>>,
    ) -> Self {
        let limits =
            Limits { max_connections: config.get_max_connections(), max_per_key: config.get_max_connections_per_key() };
        let resolver = ResolverCache::new(resolver, config.get_dns_ttl());
        Self {
            inner: Arc::new(PoolInner {
                config,
                limits,
                resolver,
                connector,
                tls,
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Loans out a connection for `key`.
    ///
    /// Dropping the returned future at any point leaves the pool accounting
    /// intact: a queued acquisition leaves the queue, a reserved slot or a
    /// connection granted in the meantime goes back to the pool.
    pub async fn acquire(&self, key: &PoolKey) -> Result<Checkout, ClientError> {
        self.checkout(key, false).await
    }

    /// Like [`acquire`](Self::acquire), but never loans an idle connection.
    ///
    /// A new connection is established; when the bounds are reached, an idle
    /// connection of `key` is closed to make room for it.
    pub async fn acquire_fresh(&self, key: &PoolKey) -> Result<Checkout, ClientError> {
        self.checkout(key, true).await
    }

    async fn checkout(&self, key: &PoolKey, fresh: bool) -> Result<Checkout, ClientError> {
        let step = {
            let mut state = self.inner.lock();
            if state.is_closed() {
                return Err(ClientError::PoolClosed { key: key.clone() });
            }

            let limits = self.inner.limits;
            let mut evicted = None;
            // nobody overtakes an acquisition of the same key that queued earlier
            let step = if state.waiting(key) > 0 {
                let (id, rx) = state.enqueue(key);
                Step::Wait(id, rx)
            } else if fresh && state.has_capacity(key, limits) {
                state.reserve(key);
                Step::Connect
            } else if let Some(conn) = state.pop_idle(key) {
                Step::Reuse(conn)
            } else if state.has_capacity(key, limits) {
                state.reserve(key);
                Step::Connect
            } else {
                if state.key_has_room(key, limits) {
                    evicted = state.evict_idle_except(key);
                }
                if evicted.is_some() {
                    state.reserve(key);
                    Step::Connect
                } else {
                    let (id, rx) = state.enqueue(key);
                    Step::Wait(id, rx)
                }
            };
            drop(state);

            if let Some(conn) = evicted {
                conn.close("evicted for another key");
            }
            step
        };

        match step {
            Step::Reuse(conn) => self.checkout_idle(conn, fresh).await,
            Step::Connect => self.connect_reserved(key).await,
            Step::Wait(id, rx) => {
                trace!(key = %key, waiter = id, "wait for a connection");
                let mut waiting = Waiting { pool: &self.inner, key, id, rx: Some(rx) };
                match waiting.granted().await {
                    Some(Grant::Idle(conn)) => self.checkout_idle(conn, fresh).await,
                    Some(Grant::Slot) => self.connect_reserved(key).await,
                    None => Err(ClientError::PoolClosed { key: key.clone() }),
                }
            }
        }
    }

    /// Like [`acquire`](Self::acquire), bounded by `timeout`.
    pub async fn acquire_timeout(&self, key: &PoolKey, timeout: Duration) -> Result<Checkout, ClientError> {
        tokio::time::timeout(timeout, self.acquire(key))
            .await
            .map_err(|_elapsed| ClientError::Timeout { key: key.clone(), timeout })?
    }

    /// Closes every idle connection, fails all queued acquisitions and refuses
    /// new ones. Loaned connections are closed when they come back.
    pub fn close_all(&self) {
        self.inner.shutdown.cancel();
        let idle = self.inner.lock().close();
        info!(idle = idle.len(), "close connection pool");
        for conn in idle {
            conn.close("pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Closes idle connections unused for the configured idle timeout.
    /// Returns how many were closed.
    pub fn sweep_idle(&self) -> usize {
        self.inner.sweep_idle()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats { total: state.total(), idle: state.idle_count(), waiting: state.waiting_total() }
    }

    /// Live connections of `key`, idle, loaned and being established.
    pub fn outstanding(&self, key: &PoolKey) -> usize {
        self.inner.lock().outstanding(key)
    }

    /// Drops cached host resolutions.
    pub fn clear_resolutions(&self) {
        self.inner.resolver.clear();
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Starts a task closing expired idle connections every `period`.
    ///
    /// The task holds the pool weakly and ends with it.
    pub(crate) fn spawn_sweeper(&self, period: Duration) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no tokio runtime, idle sweep disabled");
            return;
        };

        let pool = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        handle.spawn(sweep(pool, shutdown, period));
    }

    async fn checkout_idle(&self, mut conn: Connection, fresh: bool) -> Result<Checkout, ClientError> {
        let expired = conn.last_used().elapsed() >= self.inner.config.get_idle_timeout();
        if !fresh && !expired && conn.probe() {
            trace!(key = %conn.key(), conn_id = conn.id(), "reuse idle connection");
            return Ok(Checkout::new(conn, Arc::clone(&self.inner)));
        }

        // the idle connection's slot carries over to its replacement
        let key = conn.key().clone();
        let reason = match (fresh, expired) {
            (true, _) => "replaced by a fresh connection",
            (false, true) => "idle timeout",
            (false, false) => "stale",
        };
        conn.close(reason);
        self.connect_reserved(&key).await
    }

    async fn connect_reserved(&self, key: &PoolKey) -> Result<Checkout, ClientError> {
        let mut slot = SlotGuard { pool: &self.inner, key, armed: true };
        let conn = self.inner.connect(key).await?;
        slot.armed = false;
        Ok(Checkout::new(conn, Arc::clone(&self.inner)))
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("config", &self.inner.config).field("stats", &self.stats()).finish()
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self, key: &PoolKey) -> Result<Connection, ClientError> {
        let tls = match (&self.tls, key.is_tls()) {
            (Some(tls), true) => Some(tls),
            (None, true) => return Err(ClientError::Tls { key: key.clone(), source: Box::new(NoTls) }),
            (_, false) => None,
        };

        let addresses: Vec<SocketAddr> = self
            .resolver
            .resolve(key.host())
            .await
            .map_err(|source| ClientError::Resolution { key: key.clone(), source })?
            .into_iter()
            .map(|ip| SocketAddr::new(ip, key.port()))
            .collect();

        let (io, address) = happy_eyeballs::connect(self.connector.as_ref(), &addresses, self.config.get_happy_eyeballs_delay())
            .await
            .map_err(|source| ClientError::Connect { key: key.clone(), source })?;

        let io = match tls {
            Some(tls) => tls
                .handshake(key.host(), key.tls_verification(), io)
                .await
                .map_err(|source| ClientError::Tls { key: key.clone(), source })?,
            None => io,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, conn_id = id, %address, "connection established");
        Ok(Connection::new(id, key.clone(), io))
    }

    /// Takes a connection back from a loan.
    fn release(&self, mut conn: Connection, reusable: bool) {
        let reusable = reusable && !conn.peer_close() && conn.is_clean();
        let key = conn.key().clone();

        let mut state = self.lock();
        let retired = if reusable && !state.is_closed() {
            conn.set_idle();
            trace!(key = %key, conn_id = conn.id(), "connection back to idle");
            if let Some(conn) = state.offer_idle(conn) {
                state.push_idle(conn);
            }
            None
        } else {
            state.forget(&key);
            Some(conn)
        };
        let evicted = state.dispatch(self.limits);
        drop(state);

        if let Some(conn) = retired {
            conn.close("not reusable");
        }
        for conn in evicted {
            conn.close("evicted for another key");
        }
    }

    /// Frees a reserved slot that never became a connection.
    fn release_slot(&self, key: &PoolKey) {
        let mut state = self.lock();
        state.forget(key);
        let evicted = state.dispatch(self.limits);
        drop(state);

        for conn in evicted {
            conn.close("evicted for another key");
        }
    }

    fn sweep_idle(&self) -> usize {
        let mut state = self.lock();
        let expired = state.take_expired(self.config.get_idle_timeout());
        let evicted = state.dispatch(self.limits);
        drop(state);

        let closed = expired.len();
        for conn in expired {
            conn.close("idle timeout");
        }
        for conn in evicted {
            conn.close("evicted for another key");
        }
        closed
    }
}

async fn sweep(pool: Weak<PoolInner>, shutdown: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        select! {
            () = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }

        let Some(pool) = pool.upgrade() else {
            return;
        };
        let closed = pool.sweep_idle();
        if closed > 0 {
            debug!(closed, "swept idle connections");
        }
    }
}

/// Gives a reserved slot back unless a connection was made from it.
struct SlotGuard<'a> {
    pool: &'a PoolInner,
    key: &'a PoolKey,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            trace!(key = %self.key, "release unused slot");
            self.pool.release_slot(self.key);
        }
    }
}

/// A queued acquisition.
///
/// Dropped before it was served, it leaves the queue. Dropped after a grant
/// was sent but before it was taken, it hands the grant back.
struct Waiting<'a> {
    pool: &'a PoolInner,
    key: &'a PoolKey,
    id: u64,
    rx: Option<oneshot::Receiver<Grant>>,
}

impl Waiting<'_> {
    async fn granted(&mut self) -> Option<Grant> {
        let rx = self.rx.as_mut()?;
        let grant = rx.await.ok();
        self.rx = None;
        grant
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        if self.pool.lock().remove_waiter(self.key, self.id) {
            trace!(key = %self.key, waiter = self.id, "queued acquisition canceled");
            return;
        }

        rx.close();
        match rx.try_recv() {
            Ok(Some(Grant::Idle(conn))) => self.pool.release(conn, true),
            Ok(Some(Grant::Slot)) => self.pool.release_slot(self.key),
            Ok(None) | Err(_) => {}
        }
    }
}

/// A connection on loan from the pool.
///
/// Goes back with [`release`](Self::release). Dropping a checkout closes the
/// connection and frees its slot.
pub struct Checkout {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Checkout {
    fn new(conn: Connection, pool: Arc<PoolInner>) -> Self {
        Self { conn: Some(conn), pool }
    }

    /// Returns the connection. It is parked as idle only when `reusable`
    /// holds, the peer did not ask to close and the last exchange was read
    /// to its end.
    pub fn release(mut self, reusable: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, reusable);
        }
    }

    /// Whether the pool was closed while this connection was on loan.
    pub fn is_pool_closed(&self) -> bool {
        self.pool.shutdown.is_cancelled()
    }
}

impl Deref for Checkout {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().unwrap_or_else(|| unreachable!("checkout used after release"))
    }
}

impl DerefMut for Checkout {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("checkout used after release"))
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, false);
        }
    }
}

impl std::fmt::Debug for Checkout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").field("conn", &self.conn).finish_non_exhaustive()
    }
}
