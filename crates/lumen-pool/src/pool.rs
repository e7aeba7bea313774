//! Bounded connection pool with overflow, FIFO hand-off, and idle eviction.
//!
//! The pool keeps up to `target_size` connections, grows on demand to
//! `target_size + target_size / 2`, and beyond that queues callers. Released
//! connections go straight to the oldest waiting caller before they are ever
//! put back on the free list. When an overflow creation fails, its slot is
//! passed to the oldest waiting caller, which then opens the connection itself.

use crate::connection::{Connection, StoreConnection, StoreConnector};
use async_trait::async_trait;
use futures::future::join_all;
use lumen_config::DatabaseConfig;
use lumen_core::{ExecResult, LumenError, LumenResult, QueryExecutor, Row, SqlParam};
use lumen_resilience::{with_optional_timeout, RetryPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Open connections, including ones being created.
    pub total: usize,
    /// Idle connections ready to hand out.
    pub available: usize,
    /// Connections currently held by callers.
    pub in_use: usize,
    /// Callers still waiting for a connection.
    pub waiting: usize,
    /// Nominal pool size.
    pub target_size: usize,
    /// Overflow ceiling.
    pub max_size: usize,
}

struct PoolState<S: StoreConnector> {
    idle: VecDeque<Connection<S::Connection>>,
    in_use: HashSet<u64>,
    creating: usize,
    waiters: VecDeque<oneshot::Sender<Handoff<S>>>,
    next_id: u64,
    initializing: bool,
    initialized: bool,
    closed: bool,
}

impl<S: StoreConnector> PoolState<S> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            in_use: HashSet::new(),
            creating: 0,
            waiters: VecDeque::new(),
            next_id: 0,
            initializing: false,
            initialized: false,
            closed: false,
        }
    }

    fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.creating
    }

    /// Waiters whose caller has not given up.
    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|waiter| !waiter.is_closed()).count()
    }

    fn register(&mut self, handle: S::Connection) -> Connection<S::Connection> {
        self.next_id += 1;
        Connection::new(self.next_id, handle)
    }

    /// Removes idle connections unused for `idle_timeout`, never dropping
    /// the total below `min_size`.
    fn evict_idle(&mut self, idle_timeout: std::time::Duration, min_size: usize) -> Vec<Connection<S::Connection>> {
        let now = Instant::now();
        let mut total = self.total();
        let mut evicted = Vec::new();

        for conn in std::mem::take(&mut self.idle) {
            if total > min_size && now.duration_since(conn.last_used()) >= idle_timeout {
                total -= 1;
                evicted.push(conn);
            } else {
                self.idle.push_back(conn);
            }
        }

        evicted
    }

    fn stats(&self, config: &DatabaseConfig) -> PoolStats {
        PoolStats {
            total: self.total(),
            available: self.idle.len(),
            in_use: self.in_use.len(),
            waiting: self.live_waiters(),
            target_size: config.target_size,
            max_size: config.max_size(),
        }
    }

    fn publish_metrics(&self) {
        metrics::gauge!("lumen_pool_connections_total").set(self.total() as f64);
        metrics::gauge!("lumen_pool_connections_in_use").set(self.in_use.len() as f64);
        metrics::gauge!("lumen_pool_waiting_requests").set(self.live_waiters() as f64);
    }
}

struct PoolInner<S: StoreConnector> {
    connector: S,
    config: DatabaseConfig,
    retry: RetryPolicy,
    state: Mutex<PoolState<S>>,
}

impl<S: StoreConnector> PoolInner<S> {
    /// Opens one connection with fixed-delay retries, then applies the
    /// tuning statements. Tuning failures are logged and ignored.
    async fn create_connection(&self) -> LumenResult<S::Connection> {
        let mut handle = self
            .retry
            .execute(|| async {
                self.connector.connect().await.map_err(|e| {
                    warn!(error = %e, "Failed to open store connection");
                    e
                })
            })
            .await?;

        for statement in &self.config.tuning_statements {
            if let Err(e) = handle.execute(statement, &[]).await {
                warn!(statement = %statement, error = %e, "Connection tuning statement failed");
            }
        }

        Ok(handle)
    }

    /// Returns a connection to the pool: hands it to the oldest live waiter,
    /// or puts it on the free list and runs idle cleanup.
    fn check_in(self: &Arc<Self>, mut conn: Connection<S::Connection>) {
        conn.touch();
        let mut state = self.state.lock();
        state.in_use.remove(&conn.id());

        if state.closed {
            state.publish_metrics();
            drop(state);
            debug!(connection_id = conn.id(), "Pool closed, closing released connection");
            close_detached(vec![conn]);
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            let id = conn.id();
            state.in_use.insert(id);
            match waiter.send(Handoff::Connection(PooledConnection::new(Arc::clone(self), conn))) {
                Ok(()) => {
                    trace!(connection_id = id, "Handed connection to waiting caller");
                    state.publish_metrics();
                    return;
                }
                Err(rejected) => {
                    state.in_use.remove(&id);
                    match rejected.reclaim() {
                        Some(returned) => conn = returned,
                        None => return,
                    }
                }
            }
        }

        state.idle.push_back(conn);
        let evicted = state.evict_idle(self.config.idle_timeout(), self.config.min_size());
        state.publish_metrics();
        drop(state);

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicting idle connections");
            close_detached(evicted);
        }
    }

    /// Gives up an unused overflow slot: the oldest live waiter inherits it,
    /// otherwise the capacity is freed.
    fn release_reservation(self: &Arc<Self>) {
        let mut state = self.state.lock();

        if !state.closed {
            while let Some(waiter) = state.waiters.pop_front() {
                let grant = CreateReservation::new(Arc::clone(self));
                match waiter.send(Handoff::Create(grant)) {
                    Ok(()) => {
                        trace!("Passed overflow slot to waiting caller");
                        state.publish_metrics();
                        return;
                    }
                    Err(rejected) => {
                        let _ = rejected.reclaim();
                    }
                }
            }
        }

        state.creating = state.creating.saturating_sub(1);
        state.publish_metrics();
    }
}

/// Closes connections on the current runtime without waiting for them.
fn close_detached<C: StoreConnection>(connections: Vec<Connection<C>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                for result in join_all(connections.into_iter().map(|c| c.into_handle().close())).await {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to close store connection");
                    }
                }
            });
        }
        Err(_) => drop(connections),
    }
}

enum Acquire<S: StoreConnector> {
    Ready(Connection<S::Connection>),
    Create(CreateReservation<S>),
    Wait(oneshot::Receiver<Handoff<S>>),
}

/// What a queued caller receives.
enum Handoff<S: StoreConnector> {
    /// A released connection.
    Connection(PooledConnection<S>),
    /// An overflow slot left by a failed creation.
    Create(CreateReservation<S>),
}

impl<S: StoreConnector> Handoff<S> {
    /// Takes back a hand-off that never reached its caller.
    ///
    /// Must be used while the pool lock is held, since dropping a live
    /// reservation would lock again.
    fn reclaim(self) -> Option<Connection<S::Connection>> {
        match self {
            Self::Connection(conn) => conn.detach(),
            Self::Create(reservation) => {
                reservation.disarm();
                None
            }
        }
    }
}

/// One overflow slot counted in `creating`.
///
/// Dropping it without calling [`disarm`](Self::disarm) hands the slot on
/// through [`PoolInner::release_reservation`].
struct CreateReservation<S: StoreConnector> {
    inner: Option<Arc<PoolInner<S>>>,
}

impl<S: StoreConnector> CreateReservation<S> {
    fn new(inner: Arc<PoolInner<S>>) -> Self {
        Self { inner: Some(inner) }
    }

    fn disarm(mut self) {
        self.inner = None;
    }
}

impl<S: StoreConnector> Drop for CreateReservation<S> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release_reservation();
        }
    }
}

/// Bounded pool of persistent-store connections.
pub struct ConnectionPool<S: StoreConnector> {
    inner: Arc<PoolInner<S>>,
}

impl<S: StoreConnector> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StoreConnector> ConnectionPool<S> {
    /// Creates an empty pool. Call [`initialize`](Self::initialize) to open
    /// the initial connections.
    #[must_use]
    pub fn new(connector: S, config: DatabaseConfig) -> Self {
        let retry = RetryPolicy::fixed(config.connect_retries, config.retry_delay());
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                retry,
                state: Mutex::new(PoolState::new()),
            }),
        }
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Opens connections one at a time until the pool holds `target_size`.
    ///
    /// A call made while initialization is running or already finished is a
    /// no-op. Connections opened before a failure stay in the pool.
    pub async fn initialize(&self) -> LumenResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.initializing || state.initialized {
                debug!("Connection pool already initialized");
                return Ok(());
            }
            state.initializing = true;
            state.closed = false;
        }

        let target_size = self.inner.config.target_size;
        info!(target_size, "Initializing connection pool");

        loop {
            if self.inner.state.lock().total() >= target_size {
                break;
            }

            match self.inner.create_connection().await {
                Ok(handle) => {
                    let registered = {
                        let mut state = self.inner.state.lock();
                        if state.closed {
                            Err(handle)
                        } else {
                            Ok(state.register(handle))
                        }
                    };
                    match registered {
                        Ok(conn) => self.inner.check_in(conn),
                        Err(handle) => {
                            if let Err(e) = handle.close().await {
                                warn!(error = %e, "Failed to close connection opened during shutdown");
                            }
                            return Err(LumenError::PoolClosed);
                        }
                    }
                }
                Err(e) => {
                    self.inner.state.lock().initializing = false;
                    warn!(error = %e, "Connection pool initialization failed");
                    return Err(e);
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.initializing = false;
            state.initialized = true;
        }

        info!(target_size, "Connection pool initialized");
        Ok(())
    }

    /// Acquires a connection.
    ///
    /// Hands out an idle connection when one exists, otherwise opens an
    /// overflow connection while the pool is below its ceiling, otherwise
    /// waits in FIFO order for a release. Waiting is unbounded unless
    /// `acquire_timeout_ms` is configured.
    pub async fn get_connection(&self) -> LumenResult<PooledConnection<S>> {
        let acquire = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(LumenError::PoolClosed);
            }

            let acquire = if let Some(conn) = state.idle.pop_front() {
                state.in_use.insert(conn.id());
                Acquire::Ready(conn)
            } else if state.total() < self.inner.config.max_size() {
                state.creating += 1;
                Acquire::Create(CreateReservation::new(Arc::clone(&self.inner)))
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(waiting = state.waiters.len(), "Pool exhausted, queueing request");
                Acquire::Wait(rx)
            };
            state.publish_metrics();
            acquire
        };

        match acquire {
            Acquire::Ready(conn) => Ok(PooledConnection::new(Arc::clone(&self.inner), conn)),
            Acquire::Create(reservation) => self.create_overflow(reservation).await,
            Acquire::Wait(rx) => self.wait_for_release(rx).await,
        }
    }

    /// Opens a connection on a reserved overflow slot. On failure the slot
    /// passes to the next waiter.
    async fn create_overflow(&self, reservation: CreateReservation<S>) -> LumenResult<PooledConnection<S>> {
        let handle = self.inner.create_connection().await?;
        reservation.disarm();

        let registered = {
            let mut state = self.inner.state.lock();
            state.creating = state.creating.saturating_sub(1);

            if state.closed {
                Err(handle)
            } else {
                let conn = state.register(handle);
                state.in_use.insert(conn.id());
                state.publish_metrics();
                Ok(conn)
            }
        };

        match registered {
            Ok(conn) => {
                debug!(connection_id = conn.id(), "Created overflow connection");
                Ok(PooledConnection::new(Arc::clone(&self.inner), conn))
            }
            Err(handle) => {
                if let Err(e) = handle.close().await {
                    warn!(error = %e, "Failed to close connection opened during shutdown");
                }
                Err(LumenError::PoolClosed)
            }
        }
    }

    async fn wait_for_release(&self, rx: oneshot::Receiver<Handoff<S>>) -> LumenResult<PooledConnection<S>> {
        let handoff = with_optional_timeout(self.inner.config.acquire_timeout(), move || async move {
            rx.await.map_err(|_| LumenError::PoolClosed)
        })
        .await;

        match handoff {
            Ok(Handoff::Connection(conn)) => Ok(conn),
            Ok(Handoff::Create(reservation)) => {
                debug!("Opening connection on a slot released by a failed creation");
                self.create_overflow(reservation).await
            }
            Err(e) => {
                if let LumenError::Timeout(_) = &e {
                    warn!("Timed out waiting for a pooled connection");
                    let mut state = self.inner.state.lock();
                    state.waiters.retain(|waiter| !waiter.is_closed());
                    state.publish_metrics();
                }
                Err(e)
            }
        }
    }

    /// Returns a connection to the pool.
    ///
    /// Equivalent to dropping the guard.
    pub fn release_connection(&self, conn: PooledConnection<S>) {
        drop(conn);
    }

    /// Closes idle connections unused for longer than the idle timeout while
    /// keeping at least `target_size / 2` connections. Returns how many were
    /// closed.
    pub async fn cleanup_old_connections(&self) -> usize {
        let evicted = {
            let mut state = self.inner.state.lock();
            let evicted = state.evict_idle(self.inner.config.idle_timeout(), self.inner.config.min_size());
            state.publish_metrics();
            evicted
        };

        let count = evicted.len();
        for result in join_all(evicted.into_iter().map(|c| c.into_handle().close())).await {
            if let Err(e) = result {
                warn!(error = %e, "Failed to close idle connection");
            }
        }

        if count > 0 {
            debug!(count, "Closed idle connections");
        }
        count
    }

    /// Runs a query and returns every row. The connection is released on
    /// every exit path.
    pub async fn execute_query(&self, sql: &str, params: &[SqlParam]) -> LumenResult<Vec<Row>> {
        let mut conn = self.get_connection().await?;
        let result = conn.fetch_all(sql, params).await;
        conn.release();
        if let Err(e) = &result {
            debug!(error = %e, "Query failed");
        }
        result
    }

    /// Runs a query and returns the first row, if any.
    pub async fn execute_single_query(&self, sql: &str, params: &[SqlParam]) -> LumenResult<Option<Row>> {
        let mut conn = self.get_connection().await?;
        let result = conn.fetch_optional(sql, params).await;
        conn.release();
        if let Err(e) = &result {
            debug!(error = %e, "Query failed");
        }
        result
    }

    /// Runs a statement that does not return rows.
    pub async fn execute_run(&self, sql: &str, params: &[SqlParam]) -> LumenResult<ExecResult> {
        let mut conn = self.get_connection().await?;
        let result = conn.execute(sql, params).await;
        conn.release();
        if let Err(e) = &result {
            debug!(error = %e, "Statement failed");
        }
        result
    }

    /// Closes every idle connection, rejects every waiting caller, and marks
    /// the pool closed. Connections still held are closed on release.
    pub async fn close_all(&self) {
        let (idle, waiters, in_use) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.initialized = false;
            state.initializing = false;
            let idle = std::mem::take(&mut state.idle);
            let waiters = std::mem::take(&mut state.waiters);
            state.publish_metrics();
            (idle, waiters, state.in_use.len())
        };

        if !waiters.is_empty() {
            debug!(count = waiters.len(), "Rejecting queued connection requests");
        }
        drop(waiters);

        info!(idle = idle.len(), in_use, "Closing connection pool");
        for result in join_all(idle.into_iter().map(|c| c.into_handle().close())).await {
            if let Err(e) = result {
                warn!(error = %e, "Failed to close store connection");
            }
        }
        info!("Connection pool closed");
    }

    /// Returns current pool counters.
    #[must_use]
    pub fn get_pool_stats(&self) -> PoolStats {
        self.inner.state.lock().stats(&self.inner.config)
    }
}

#[async_trait]
impl<S: StoreConnector> QueryExecutor for ConnectionPool<S> {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> LumenResult<Vec<Row>> {
        self.execute_query(sql, params).await
    }
}

impl<S: StoreConnector> std::fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.get_pool_stats();
        f.debug_struct("ConnectionPool")
            .field("total", &stats.total)
            .field("available", &stats.available)
            .field("in_use", &stats.in_use)
            .field("waiting", &stats.waiting)
            .finish()
    }
}

/// A connection checked out of the pool.
///
/// Dereferences to the store connection and returns it to the pool when
/// released or dropped.
pub struct PooledConnection<S: StoreConnector> {
    conn: Option<Connection<S::Connection>>,
    pool: Arc<PoolInner<S>>,
}

const RETURNED: &str = "connection already returned to the pool";

impl<S: StoreConnector> PooledConnection<S> {
    fn new(pool: Arc<PoolInner<S>>, conn: Connection<S::Connection>) -> Self {
        Self { conn: Some(conn), pool }
    }

    /// Identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, Connection::id)
    }

    /// When the underlying connection was opened.
    #[must_use]
    pub fn created_at(&self) -> Option<Instant> {
        self.conn.as_ref().map(Connection::created_at)
    }

    /// Returns the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    fn detach(mut self) -> Option<Connection<S::Connection>> {
        self.conn.take()
    }
}

impl<S: StoreConnector> Deref for PooledConnection<S> {
    type Target = S::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(RETURNED).handle()
    }
}

impl<S: StoreConnector> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect(RETURNED).handle_mut()
    }
}

impl<S: StoreConnector> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn);
        }
    }
}

impl<S: StoreConnector> std::fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("id", &self.id()).finish()
    }
}
