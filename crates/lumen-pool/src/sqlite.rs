//! SQLite store adapter built on `sqlx`.

use crate::connection::{StoreConnection, StoreConnector};
use async_trait::async_trait;
use lumen_core::{ExecResult, LumenError, LumenResult, Row, SqlParam};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection as _, Row as _, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::debug;

/// Opens SQLite connections from a database URL.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl SqliteConnector {
    /// Parses a URL such as `sqlite://data/lumen.db?mode=rwc`.
    pub fn new(url: &str) -> LumenResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LumenError::Configuration(format!("Invalid database URL '{}': {}", url, e)))?;
        Ok(Self { options })
    }

    /// Uses pre-built connect options.
    #[must_use]
    pub fn with_options(options: SqliteConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    type Connection = SqliteStoreConnection;

    async fn connect(&self) -> LumenResult<Self::Connection> {
        let conn = SqliteConnection::connect_with(&self.options).await?;
        debug!("Opened SQLite connection");
        Ok(SqliteStoreConnection { conn })
    }
}

/// A single SQLite connection.
#[derive(Debug)]
pub struct SqliteStoreConnection {
    conn: SqliteConnection,
}

#[async_trait]
impl StoreConnection for SqliteStoreConnection {
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<ExecResult> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await?;

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn fetch_all(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<Vec<Row>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await?;

        rows.iter().map(row_to_json).collect()
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[SqlParam]) -> LumenResult<Option<Row>> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&mut self.conn)
            .await?;

        row.as_ref().map(row_to_json).transpose()
    }

    async fn close(self) -> LumenResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            // Arrays and objects are stored as JSON text
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn row_to_json(row: &SqliteRow) -> LumenResult<Row> {
    let mut map = Row::new();

    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => Value::from(row.try_get_unchecked::<String, _>(index)?),
            }
        };

        map.insert(column.name().to_string(), value);
    }

    Ok(map)
}
