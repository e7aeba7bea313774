//! Core traits and value types shared across crates.

use crate::LumenResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A positional statement parameter.
pub type SqlParam = serde_json::Value;

/// A result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Number of rows changed by the statement.
    pub rows_affected: u64,
    /// Row id of the last inserted row, when the store reports one.
    pub last_insert_id: Option<i64>,
}

/// Something that can run a read query against the persistent store.
///
/// The cache layer memoizes query results through this seam without
/// depending on the pool implementation.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs a query and returns every row.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> LumenResult<Vec<Row>>;
}
