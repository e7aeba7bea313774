//! Redis backend over a `deadpool-redis` connection pool.

use super::CacheBackend;
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Pool, Runtime};
use lumen_config::CacheConfig;
use lumen_core::{LumenError, LumenResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Create a Redis connection pool and verify it with a `PING`.
pub async fn create_redis_pool(config: &CacheConfig) -> LumenResult<Pool> {
    info!(host = %config.host, port = config.port, "Creating Redis connection pool for cache...");

    let cfg = Config::from_url(config.url());

    let pool = cfg
        .builder()
        .map_err(|e| LumenError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| LumenError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| LumenError::Cache(format!("Failed to get Redis connection: {}", e)))?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await
        .map_err(|e| LumenError::Cache(format!("Redis ping failed: {}", e)))?;

    info!("Redis connection pool created successfully");
    Ok(pool)
}

/// Single-endpoint Redis backend.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Arc<Pool>,
}

impl RedisBackend {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }

    /// Creates the pool from configuration and wraps it.
    pub async fn connect(config: &CacheConfig) -> LumenResult<Self> {
        let pool = create_redis_pool(config).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    async fn get_conn(&self) -> LumenResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to get Redis connection: {}", e)))
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisBackend")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> LumenResult<Option<String>> {
        let mut conn = self.get_conn().await?;
        conn.get(key)
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to get key '{}': {}", key, e)))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> LumenResult<()> {
        let mut conn = self.get_conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1))
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to set key '{}': {}", key, e)))
    }

    async fn del(&self, keys: &[String]) -> LumenResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn().await?;
        let deleted: i64 = conn
            .del(keys)
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to delete keys: {}", e)))?;

        debug!(requested = keys.len(), deleted, "Deleted cache keys");
        Ok(deleted.max(0) as u64)
    }

    async fn keys(&self, pattern: &str) -> LumenResult<Vec<String>> {
        let mut conn = self.get_conn().await?;

        // KEYS blocks the server; patterns here are always namespaced
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut *conn)
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to list keys '{}': {}", pattern, e)))
    }

    async fn ttl(&self, key: &str) -> LumenResult<i64> {
        let mut conn = self.get_conn().await?;
        conn.ttl(key)
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to read TTL of '{}': {}", key, e)))
    }

    async fn dbsize(&self) -> LumenResult<u64> {
        let mut conn = self.get_conn().await?;
        redis::cmd("DBSIZE")
            .query_async(&mut *conn)
            .await
            .map_err(|e| LumenError::Cache(format!("DBSIZE failed: {}", e)))
    }

    async fn ping(&self) -> LumenResult<String> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| LumenError::Cache(format!("PING failed: {}", e)))
    }

    async fn info(&self, section: &str) -> LumenResult<String> {
        let mut conn = self.get_conn().await?;
        redis::cmd("INFO")
            .arg(section)
            .query_async(&mut *conn)
            .await
            .map_err(|e| LumenError::Cache(format!("INFO {} failed: {}", section, e)))
    }
}
