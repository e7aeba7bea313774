//! Categorized single-node cache service.

use crate::backend::CacheBackend;
use crate::keys::{CacheCategory, CacheKeys, KeyPart};
use crate::metrics::names;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use chrono::{DateTime, Utc};
use lumen_config::CacheConfig;
use lumen_core::{LumenError, LumenResult, QueryExecutor, Row, SqlParam};
use lumen_resilience::with_timeout;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on the health probe round-trip.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a cache liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    /// Whether the backend answered the probe.
    pub connected: bool,
    /// Probe round-trip in milliseconds.
    pub latency_ms: Option<u64>,
    /// Key count reported by the backend.
    pub key_count: Option<u64>,
    /// Counters at the time of the probe.
    pub stats: CacheStatsSnapshot,
    /// Failure description when not connected.
    pub error: Option<String>,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// Cache-aside service over a single Redis endpoint.
///
/// Every operation absorbs backend failures: reads report a miss, writes
/// report `false`. Only the fallbacks given to [`CacheService::get_with_fallback`]
/// and [`CacheService::get_query_with_cache`] can surface errors.
pub struct CacheService {
    backend: Option<Arc<dyn CacheBackend>>,
    config: CacheConfig,
    keys: CacheKeys,
    stats: CacheStats,
    executor: Option<Arc<dyn QueryExecutor>>,
}

impl CacheService {
    /// Create a cache service over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend: Some(backend),
            keys: CacheKeys::new(config.key_prefix.clone()),
            config,
            stats: CacheStats::new("single"),
            executor: None,
        }
    }

    /// Create a no-op cache service (for when the cache is disabled).
    #[must_use]
    pub fn disabled(config: CacheConfig) -> Self {
        Self {
            backend: None,
            keys: CacheKeys::new(config.key_prefix.clone()),
            config,
            stats: CacheStats::new("single"),
            executor: None,
        }
    }

    /// Sets the store used by [`CacheService::get_query_with_cache`] on a miss.
    #[must_use]
    pub fn with_query_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Returns true when a backend is attached.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    /// TTL for a category: its configured value, else the global default.
    #[must_use]
    pub fn ttl_for(&self, category: CacheCategory) -> u64 {
        match category.ttl_secs(&self.config.ttl) {
            0 => self.config.default_ttl_secs,
            ttl => ttl,
        }
    }

    fn resolve_ttl(&self, category: CacheCategory, ttl: Option<Duration>) -> u64 {
        ttl.map_or_else(|| self.ttl_for(category), |ttl| ttl.as_secs().max(1))
    }

    /// Reads and deserializes a cached value.
    pub async fn get<T: DeserializeOwned>(&self, category: CacheCategory, parts: &[KeyPart<'_>]) -> Option<T> {
        let key = self.keys.entry(category, parts);
        self.get_by_key(&key).await
    }

    /// Serializes and stores a value under the category's TTL unless `ttl` overrides it.
    pub async fn set<T: Serialize + Sync>(
        &self,
        category: CacheCategory,
        parts: &[KeyPart<'_>],
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let key = self.keys.entry(category, parts);
        self.set_by_key(&key, value, self.resolve_ttl(category, ttl)).await
    }

    /// Removes one entry. Returns whether it existed.
    pub async fn delete(&self, category: CacheCategory, parts: &[KeyPart<'_>]) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        let key = self.keys.entry(category, parts);
        match backend.del(&[key.clone()]).await {
            Ok(deleted) => {
                self.stats.record_deletes(deleted);
                debug!(key = %key, deleted = deleted > 0, "Cache delete");
                deleted > 0
            }
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Removes every entry of a category. Returns whether anything was removed.
    pub async fn invalidate_category(&self, category: CacheCategory) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        let pattern = self.keys.category_pattern(category);
        let result = async {
            let keys = backend.keys(&pattern).await?;
            backend.del(&keys).await
        }
        .await;

        match result {
            Ok(deleted) => {
                self.stats.record_deletes(deleted);
                info!(category = %category, deleted, "Invalidated cache category");
                deleted > 0
            }
            Err(e) => {
                self.stats.record_error();
                warn!(category = %category, error = %e, "Cache category invalidation failed");
                false
            }
        }
    }

    /// Cache-aside read.
    ///
    /// Returns the cached value when present. Otherwise runs `fallback`, caches
    /// a `Some` result, and returns it. Errors from `fallback` propagate.
    pub async fn get_with_fallback<T, F, Fut>(
        &self,
        category: CacheCategory,
        parts: &[KeyPart<'_>],
        fallback: F,
        ttl: Option<Duration>,
    ) -> LumenResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = LumenResult<Option<T>>>,
    {
        let key = self.keys.entry(category, parts);
        if let Some(value) = self.get_by_key(&key).await {
            return Ok(Some(value));
        }

        let value = fallback().await?;
        if let Some(value) = &value {
            self.set_by_key(&key, value, self.resolve_ttl(category, ttl)).await;
        }
        Ok(value)
    }

    /// Cache key used by [`CacheService::get_query_with_cache`].
    #[must_use]
    pub fn query_key(&self, query: &str, params: &[SqlParam]) -> String {
        self.keys.query(query, params)
    }

    /// Memoizes a read query through the configured executor.
    pub async fn get_query_with_cache(
        &self,
        query: &str,
        params: &[SqlParam],
        ttl: Option<Duration>,
    ) -> LumenResult<Vec<Row>> {
        let executor = self.executor.as_ref().ok_or_else(|| {
            LumenError::Configuration("No query executor configured for cached queries".to_string())
        })?;

        let key = self.query_key(query, params);
        if let Some(rows) = self.get_by_key::<Vec<Row>>(&key).await {
            return Ok(rows);
        }

        let rows = executor.query(query, params).await?;
        self.set_by_key(&key, &rows, self.resolve_ttl(CacheCategory::Query, ttl))
            .await;
        Ok(rows)
    }

    /// Evicts roughly a tenth of the keys when the cache nears `max_keys`.
    ///
    /// Keys closest to expiry go first; keys without expiry go last.
    /// Returns the number of keys removed.
    pub async fn run_maintenance(&self) -> u64 {
        let Some(backend) = &self.backend else {
            return 0;
        };

        let count = match backend.dbsize().await {
            Ok(count) => count,
            Err(e) => {
                self.stats.record_error();
                warn!(error = %e, "Cache maintenance could not read key count");
                return 0;
            }
        };

        let threshold = self.config.max_keys.saturating_mul(9) / 10;
        if count <= threshold {
            debug!(count, threshold, "Cache below maintenance threshold");
            return 0;
        }

        let keys = match backend.keys(&self.keys.all_pattern()).await {
            Ok(keys) => keys,
            Err(e) => {
                self.stats.record_error();
                warn!(error = %e, "Cache maintenance could not list keys");
                return 0;
            }
        };

        let mut candidates = Vec::with_capacity(keys.len());
        for key in keys {
            match backend.ttl(&key).await {
                Ok(ttl) if ttl >= 0 => candidates.push((ttl as u64, key)),
                Ok(-1) => candidates.push((u64::MAX, key)),
                // Expired between listing and probing
                Ok(_) => {}
                Err(e) => {
                    self.stats.record_error();
                    debug!(key = %key, error = %e, "Skipping key with unreadable TTL");
                }
            }
        }
        candidates.sort();

        let batch = (count / 10).max(1) as usize;
        let victims: Vec<String> = candidates.into_iter().take(batch).map(|(_, key)| key).collect();

        match backend.del(&victims).await {
            Ok(evicted) => {
                self.stats.record_deletes(evicted);
                counter!(names::CACHE_EVICTIONS_TOTAL).increment(evicted);
                info!(count, evicted, max_keys = self.config.max_keys, "Cache maintenance evicted keys");
                evicted
            }
            Err(e) => {
                self.stats.record_error();
                warn!(error = %e, "Cache maintenance eviction failed");
                0
            }
        }
    }

    #[must_use]
    pub fn get_cache_stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Pings the backend and reports connectivity with current statistics.
    pub async fn health_check(&self) -> CacheHealth {
        let checked_at = Utc::now();
        let Some(backend) = &self.backend else {
            return CacheHealth {
                connected: false,
                latency_ms: None,
                key_count: None,
                stats: self.stats.snapshot(),
                error: Some("Cache is disabled".to_string()),
                checked_at,
            };
        };

        let started = Instant::now();
        let probe = with_timeout(HEALTH_CHECK_TIMEOUT, || backend.ping()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match probe {
            Ok(_) => CacheHealth {
                connected: true,
                latency_ms: Some(latency_ms),
                key_count: backend.dbsize().await.ok(),
                stats: self.stats.snapshot(),
                error: None,
                checked_at,
            },
            Err(e) => {
                self.stats.record_error();
                warn!(error = %e, "Cache health check failed");
                CacheHealth {
                    connected: false,
                    latency_ms: None,
                    key_count: None,
                    stats: self.stats.snapshot(),
                    error: Some(e.to_string()),
                    checked_at,
                }
            }
        }
    }

    async fn get_by_key<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Some(backend) = &self.backend else {
            self.stats.record_miss();
            return None;
        };

        match backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.stats.record_hit();
                    debug!(key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    self.stats.record_miss();
                    self.stats.record_error();
                    warn!(key = %key, error = %e, "Failed to decode cached value");
                    None
                }
            },
            Ok(None) => {
                self.stats.record_miss();
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                self.stats.record_miss();
                self.stats.record_error();
                warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn set_by_key<T: Serialize + Sync + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Failed to encode value for cache");
                return false;
            }
        };

        match backend.set_ex(key, &raw, ttl_secs).await {
            Ok(()) => {
                self.stats.record_set();
                debug!(key = %key, ttl_secs, "Cached value");
                true
            }
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("enabled", &self.is_enabled())
            .field("prefix", &self.keys.prefix())
            .field("query_executor", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}
