//! # Lumen Cache
//!
//! Tiered caching for Lumen:
//!
//! - [`CacheService`]: categorized cache-aside helpers over one Redis endpoint,
//!   with statistics, health checks, and a periodic maintenance task.
//! - [`DistributedCache`]: a cluster-aware coordinator with single-instance
//!   fallback, consistency repair, and health probing.
//!
//! Both absorb backend failures: callers see misses and `false`, never errors.
//!
//! ```no_run
//! use lumen_cache::{CacheCategory, CacheService, MemoryBackend};
//! use lumen_config::CacheConfig;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let cache = CacheService::new(Arc::new(MemoryBackend::new()), CacheConfig::default());
//! cache.set(CacheCategory::UserData, &[&42], &"Ada", None).await;
//! let name: Option<String> = cache.get(CacheCategory::UserData, &[&42]).await;
//! # }
//! ```

pub mod backend;
pub mod distributed;
pub mod keys;
pub mod maintenance;
pub mod metrics;
pub mod service;
pub mod stats;

pub use backend::{create_redis_pool, CacheBackend, MemoryBackend, RedisBackend};
pub use distributed::{
    ClusterBackend, ClusterConnector, ClusterEvent, ClusterHealth, ClusterNode, ClusterNodeStatus,
    ConnectionMonitor, ConsistencyReport, CoordinatorState, DistributedCache, RedisClusterConnector,
    DEFAULT_RECONNECT_INTERVAL,
};
pub use keys::{normalize_query, CacheCategory, CacheKeys, KeyPart};
pub use maintenance::MaintenanceHandle;
pub use service::{CacheHealth, CacheService};
pub use stats::{CacheStats, CacheStatsSnapshot};
