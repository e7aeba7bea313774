//! Key-value backends the cache services talk to.

mod memory;
mod redis_backend;

pub use self::memory::MemoryBackend;
pub use self::redis_backend::{create_redis_pool, RedisBackend};

use async_trait::async_trait;
use lumen_core::LumenResult;

/// Minimal command surface the cache tiers need from a key-value store.
///
/// Every method may fail; callers in this crate turn failures into neutral
/// values before anything reaches application code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads the raw value stored under `key`.
    async fn get(&self, key: &str) -> LumenResult<Option<String>>;

    /// Stores `value` under `key`, expiring after `ttl_secs` seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> LumenResult<()>;

    /// Removes the given keys and returns how many existed.
    async fn del(&self, keys: &[String]) -> LumenResult<u64>;

    /// Lists keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> LumenResult<Vec<String>>;

    /// Remaining time to live in seconds: `-1` without expiry, `-2` when missing.
    async fn ttl(&self, key: &str) -> LumenResult<i64>;

    /// Number of keys in the selected database.
    async fn dbsize(&self) -> LumenResult<u64>;

    /// Liveness probe.
    async fn ping(&self) -> LumenResult<String>;

    /// Server information text for a section such as `memory` or `server`.
    async fn info(&self, section: &str) -> LumenResult<String>;
}
