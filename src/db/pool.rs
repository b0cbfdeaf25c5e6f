//! Bounded, health-checked connection pool with overflow.
//!
//! The pool keeps up to `base_size` idle connections and lets up to
//! `base_size + max_overflow` callers hold a connection at the same time.
//! Concurrency is bounded by a semaphore: every checkout owns one permit
//! for as long as its [`PooledConnection`] guard lives, so no two callers can
//! ever hold the same connection and `in_use` never exceeds the capacity.
//!
//! Recycling is lazy. Nothing sweeps the idle set in the background:
//!
//! - on acquire, idle connections past `max_age` are destroyed and the rest are
//!   checked with [`ManageConnection::is_valid`] before being handed out
//! - on release, connections that are stale, failed, or above `base_size`
//!   are destroyed instead of returned to the idle set
//!
//! A destroyed connection is replaced the next time a caller finds the idle
//! set empty. Connection creation failures are counted and surface to that
//! caller only; the next acquire tries again.

use crate::db::manager::ManageConnection;
use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_CHECKOUT_TIMEOUT_SECS, DEFAULT_MAX_CONNECTION_AGE_SECS, DEFAULT_MAX_OVERFLOW,
    DEFAULT_POOL_SIZE,
};

/// Pool sizing and lifecycle settings. Fixed for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub base_size: usize,
    pub max_overflow: usize,
    /// How long `acquire` waits for a free slot before failing with `PoolExhausted`.
    pub checkout_timeout: Duration,
    /// Connections older than this are recycled.
    pub max_age: Duration,
}

impl PoolConfig {
    /// Maximum number of simultaneous checkouts.
    pub fn capacity(&self) -> usize {
        self.base_size + self.max_overflow
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            checkout_timeout: Duration::from_secs(DEFAULT_CHECKOUT_TIMEOUT_SECS),
            max_age: Duration::from_secs(DEFAULT_MAX_CONNECTION_AGE_SECS),
        }
    }
}

/// Lifecycle tag of a pooled connection, evaluated lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Fresh,
    /// Older than `max_age`; destroyed at the next acquire or release.
    Stale,
    /// Failed a health check or was marked failed by its holder.
    Failed,
}

/// Bookkeeping carried alongside each native connection.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub id: u64,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u64,
    failed: bool,
}

impl ConnectionMeta {
    fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            failed: false,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self, max_age: Duration) -> ConnectionState {
        if self.failed {
            ConnectionState::Failed
        } else if self.age() > max_age {
            ConnectionState::Stale
        } else {
            ConnectionState::Fresh
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live connections (idle + checked out).
    pub size: usize,
    /// Idle connections ready for checkout.
    pub available: usize,
    pub in_use: usize,
    /// Checkouts beyond `base_size`.
    pub overflow_in_use: usize,
    pub base_size: usize,
    pub max_overflow: usize,
    pub created_total: u64,
    pub recycled_total: u64,
    pub failed_total: u64,
    pub acquired_total: u64,
    pub exhausted_total: u64,
}

/// Atomic counters, `Relaxed` throughout: they feed stats and metrics only.
#[derive(Debug, Default)]
struct PoolCounters {
    live: AtomicUsize,
    in_use: AtomicUsize,
    created_total: AtomicU64,
    recycled_total: AtomicU64,
    failed_total: AtomicU64,
    acquired_total: AtomicU64,
    exhausted_total: AtomicU64,
    next_id: AtomicU64,
}

/// Why a connection left the pool for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyReason {
    Stale,
    Failed,
    Overflow,
    Closed,
    /// The acquire holding it was cancelled mid health check
    Abandoned,
}

impl DestroyReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Failed => "failed",
            Self::Overflow => "overflow",
            Self::Closed => "closed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// One unit of `live` owned by an acquire that is still awaiting I/O.
///
/// If the acquire future is dropped (checkout timeout, caller cancellation)
/// before [`LiveSlot::settle`] is called, the unit is given back: a connection
/// being opened is simply uncounted, and an idle connection under health check
/// is destroyed.
struct LiveSlot<'a, M: ManageConnection> {
    inner: &'a PoolInner<M>,
    existing: Option<ConnectionMeta>,
    settled: bool,
}

impl<'a, M: ManageConnection> LiveSlot<'a, M> {
    /// Count a connection that is about to be opened.
    fn opening(inner: &'a PoolInner<M>) -> Self {
        inner.counters.live.fetch_add(1, Ordering::Relaxed);
        Self {
            inner,
            existing: None,
            settled: false,
        }
    }

    /// Guard an idle connection that was popped and is already counted.
    fn reusing(inner: &'a PoolInner<M>, meta: &ConnectionMeta) -> Self {
        Self {
            inner,
            existing: Some(meta.clone()),
            settled: false,
        }
    }

    /// The connection is handed to the caller; keep the unit.
    fn settle(mut self) {
        self.settled = true;
    }

    /// Destroy the guarded idle connection for `reason`.
    fn discard(mut self, reason: DestroyReason) {
        self.settled = true;
        if let Some(meta) = &self.existing {
            self.inner.destroy(meta, reason);
        }
    }
}

impl<M: ManageConnection> Drop for LiveSlot<'_, M> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match &self.existing {
            Some(meta) => self.inner.destroy(meta, DestroyReason::Abandoned),
            None => {
                self.inner.counters.live.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

struct IdleConnection<C> {
    conn: C,
    meta: ConnectionMeta,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    /// LIFO so the most recently used connection is reused first.
    idle: Mutex<Vec<IdleConnection<M::Connection>>>,
    counters: PoolCounters,
    closed: AtomicBool,
}

impl<M: ManageConnection> PoolInner<M> {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection<M::Connection>>> {
        // Idle entries are plain data, so a poisoned lock is still consistent.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_idle(&self) -> Option<IdleConnection<M::Connection>> {
        self.lock_idle().pop()
    }

    fn destroy(&self, meta: &ConnectionMeta, reason: DestroyReason) {
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
        let counter = match reason {
            DestroyReason::Failed => &self.counters.failed_total,
            _ => &self.counters.recycled_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = meta.id,
            use_count = meta.use_count,
            age_ms = meta.age().as_millis() as u64,
            reason = reason.as_str(),
            "Destroying pooled connection"
        );
    }

    /// Return a connection after checkout. Never blocks on I/O.
    fn release(&self, conn: M::Connection, mut meta: ConnectionMeta) {
        self.counters.in_use.fetch_sub(1, Ordering::Relaxed);

        if self.closed.load(Ordering::Acquire) {
            self.destroy(&meta, DestroyReason::Closed);
            return;
        }

        match meta.state(self.config.max_age) {
            ConnectionState::Failed => self.destroy(&meta, DestroyReason::Failed),
            ConnectionState::Stale => self.destroy(&meta, DestroyReason::Stale),
            ConnectionState::Fresh => {
                let mut idle = self.lock_idle();
                // Checked again under the lock so nothing is pushed after `close` drained the set.
                if self.closed.load(Ordering::Acquire) {
                    drop(idle);
                    self.destroy(&meta, DestroyReason::Closed);
                } else if self.counters.live.load(Ordering::Relaxed) > self.config.base_size {
                    // Shrink back toward base_size once the extra connection is no longer held.
                    drop(idle);
                    self.destroy(&meta, DestroyReason::Overflow);
                } else {
                    meta.last_used_at = Instant::now();
                    idle.push(IdleConnection { conn, meta });
                }
            }
        }
    }
}

/// A bounded pool of connections produced by `M`.
pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Create an empty pool. Connections are opened on demand.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        info!(
            base_size = config.base_size,
            max_overflow = config.max_overflow,
            checkout_timeout_ms = config.checkout_timeout.as_millis() as u64,
            max_age_secs = config.max_age.as_secs(),
            "Creating connection pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                manager,
                config,
                semaphore: Arc::new(Semaphore::new(config.capacity())),
                idle: Mutex::new(Vec::with_capacity(config.base_size)),
                counters: PoolCounters::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection, waiting up to the configured checkout timeout.
    pub async fn acquire(&self) -> DbResult<PooledConnection<M>> {
        self.acquire_timeout(self.inner.config.checkout_timeout)
            .await
    }

    /// Check out a connection, waiting up to `wait` for a free slot.
    ///
    /// Fails with [`DbError::PoolExhausted`] if every slot stays taken for the
    /// whole wait, or with a connection error if a new connection had to be
    /// opened and that failed.
    pub async fn acquire_timeout(&self, wait: Duration) -> DbResult<PooledConnection<M>> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed);
        }

        let permit = match timeout(wait, Arc::clone(&inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                inner.counters.exhausted_total.fetch_add(1, Ordering::Relaxed);
                warn!(
                    waited_ms = wait.as_millis() as u64,
                    in_use = inner.counters.in_use.load(Ordering::Relaxed),
                    "Connection pool exhausted"
                );
                return Err(DbError::pool_exhausted(wait.as_millis() as u64));
            }
        };

        let (conn, meta) = match self.take_idle().await {
            Some(entry) => entry,
            None => self.open_new().await?,
        };

        Ok(self.check_out(conn, meta, permit))
    }

    /// Pop idle connections until one is young enough and passes the health check.
    async fn take_idle(&self) -> Option<(M::Connection, ConnectionMeta)> {
        let inner = &self.inner;
        while let Some(IdleConnection { mut conn, meta }) = inner.pop_idle() {
            if meta.state(inner.config.max_age) == ConnectionState::Stale {
                inner.destroy(&meta, DestroyReason::Stale);
                continue;
            }
            let slot = LiveSlot::reusing(inner, &meta);
            match inner.manager.is_valid(&mut conn).await {
                Ok(()) => {
                    slot.settle();
                    return Some((conn, meta));
                }
                Err(e) => {
                    warn!(
                        connection_id = meta.id,
                        error = %e,
                        "Pooled connection failed health check, replacing"
                    );
                    slot.discard(DestroyReason::Failed);
                }
            }
        }
        None
    }

    async fn open_new(&self) -> DbResult<(M::Connection, ConnectionMeta)> {
        let inner = &self.inner;
        let slot = LiveSlot::opening(inner);
        match inner.manager.connect().await {
            Ok(conn) => {
                slot.settle();
                let id = inner.counters.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                inner.counters.created_total.fetch_add(1, Ordering::Relaxed);
                debug!(connection_id = id, "Opened new pooled connection");
                Ok((conn, ConnectionMeta::new(id)))
            }
            Err(e) => {
                drop(slot);
                inner.counters.failed_total.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to open pooled connection");
                Err(e)
            }
        }
    }

    fn check_out(
        &self,
        conn: M::Connection,
        mut meta: ConnectionMeta,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<M> {
        meta.use_count += 1;
        meta.last_used_at = Instant::now();
        self.inner.counters.in_use.fetch_add(1, Ordering::Relaxed);
        self.inner
            .counters
            .acquired_total
            .fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            conn: Some(conn),
            meta,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Snapshot of the pool counters. Safe to call concurrently with acquire/release.
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let c = &inner.counters;
        let in_use = c.in_use.load(Ordering::Relaxed);
        PoolStats {
            size: c.live.load(Ordering::Relaxed),
            available: inner.lock_idle().len(),
            in_use,
            overflow_in_use: in_use.saturating_sub(inner.config.base_size),
            base_size: inner.config.base_size,
            max_overflow: inner.config.max_overflow,
            created_total: c.created_total.load(Ordering::Relaxed),
            recycled_total: c.recycled_total.load(Ordering::Relaxed),
            failed_total: c.failed_total.load(Ordering::Relaxed),
            acquired_total: c.acquired_total.load(Ordering::Relaxed),
            exhausted_total: c.exhausted_total.load(Ordering::Relaxed),
        }
    }

    /// Close the pool: idle connections are destroyed now, checked-out ones on
    /// release, and every pending or future acquire fails.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.semaphore.close();
        let drained: Vec<_> = inner.lock_idle().drain(..).collect();
        for entry in &drained {
            inner.destroy(&entry.meta, DestroyReason::Closed);
        }
        info!(
            closed_idle = drained.len(),
            in_use = inner.counters.in_use.load(Ordering::Relaxed),
            "Connection pool closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Exclusive checkout of one connection. Dropping it releases the connection.
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    meta: ConnectionMeta,
    pool: Arc<PoolInner<M>>,
    // Dropped after `Drop::drop` has returned the connection, so a waiter that
    // wakes on this permit already sees it in the idle set.
    _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Process-unique identity of the underlying connection.
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn meta(&self) -> &ConnectionMeta {
        &self.meta
    }

    pub fn use_count(&self) -> u64 {
        self.meta.use_count
    }

    /// Tag the connection as broken so release destroys it.
    pub fn mark_failed(&mut self) {
        self.meta.failed = true;
    }

    /// Return the connection to the pool. Same as dropping the guard.
    pub fn release(self) {}
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("BUG: PooledConnection used after release")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("BUG: PooledConnection used after release")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.meta.clone());
        }
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("meta", &self.meta)
            .finish()
    }
}
