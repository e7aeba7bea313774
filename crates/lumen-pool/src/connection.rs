//! Store connection traits and the pool-owned connection record.

use async_trait::async_trait;
use lumen_core::{ExecResult, LumenResult, Row, SqlParam};
use tokio::time::Instant;

/// An open connection to the persistent store.
///
/// Implementations execute one statement at a time with positional
/// parameters. The pool never shares a connection between callers.
#[async_trait]
pub trait StoreConnection: Send + 'static {
    /// Runs a statement that does not return rows.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<ExecResult>;

    /// Runs a query and returns every row.
    async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<Vec<Row>>;

    /// Runs a query and returns the first row, if any.
    async fn fetch_optional(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<Option<Row>>;

    /// Closes the connection.
    async fn close(self) -> LumenResult<()>;
}

/// Opens new store connections for the pool.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: StoreConnection;

    /// Opens one connection.
    async fn connect(&self) -> LumenResult<Self::Connection>;
}

/// A connection record owned by the pool.
#[derive(Debug)]
pub struct Connection<C> {
    id: u64,
    handle: C,
    created_at: Instant,
    last_used: Instant,
}

impl<C> Connection<C> {
    pub(crate) fn new(id: u64, handle: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            handle,
            created_at: now,
            last_used: now,
        }
    }

    /// Monotonic identifier assigned at creation.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// When the connection was opened.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the connection was last returned to the pool.
    #[must_use]
    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn handle(&self) -> &C {
        &self.handle
    }

    pub(crate) fn handle_mut(&mut self) -> &mut C {
        &mut self.handle
    }

    pub(crate) fn into_handle(self) -> C {
        self.handle
    }
}
