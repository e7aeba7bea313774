//! # Lumen Pool
//!
//! Bounded connection pool for the persistent store, plus the SQLite adapter.
//!
//! ```no_run
//! use lumen_config::DatabaseConfig;
//! use lumen_pool::create_sqlite_pool;
//! use serde_json::json;
//!
//! # async fn demo() -> lumen_core::LumenResult<()> {
//! let pool = create_sqlite_pool(&DatabaseConfig::default()).await?;
//! let rows = pool.execute_query("SELECT * FROM events WHERE id = ?", &[json!(7)]).await?;
//! # let _ = rows;
//! pool.close_all().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod pool;
mod sqlite;

pub use connection::{Connection, StoreConnection, StoreConnector};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use sqlite::{SqliteConnector, SqliteStoreConnection};

use lumen_config::DatabaseConfig;
use lumen_core::LumenResult;
use tracing::info;

/// Creates and initializes a SQLite-backed pool from configuration.
pub async fn create_sqlite_pool(config: &DatabaseConfig) -> LumenResult<ConnectionPool<SqliteConnector>> {
    info!("Connecting to SQLite database...");
    let connector = SqliteConnector::new(&config.url)?;
    let pool = ConnectionPool::new(connector, config.clone());
    pool.initialize().await?;
    info!("SQLite connection pool established");
    Ok(pool)
}
