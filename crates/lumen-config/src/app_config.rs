//! Application configuration structures.

use lumen_core::telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Persistent store connection pool configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Single-node cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Distributed cache configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "lumen".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Default tuning statements applied to every new store connection.
pub const DEFAULT_TUNING_STATEMENTS: [&str; 4] = [
    "PRAGMA journal_mode = WAL",
    "PRAGMA synchronous = NORMAL",
    "PRAGMA cache_size = 10000",
    "PRAGMA foreign_keys = ON",
];

/// Database connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL.
    pub url: String,
    /// Nominal pool size. Overflow may add up to half as many again.
    pub target_size: usize,
    /// Retries after a failed connection attempt.
    pub connect_retries: u32,
    /// Fixed delay between connection attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Idle time after which a free connection may be evicted, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Upper bound on waiting for a connection, in milliseconds. Unset waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Statements run on each new connection. Failures are logged, not fatal.
    pub tuning_statements: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/lumen.db?mode=rwc".to_string(),
            target_size: 5,
            connect_retries: 3,
            retry_delay_ms: 1000,
            idle_timeout_ms: 300_000,
            acquire_timeout_ms: None,
            tuning_statements: DEFAULT_TUNING_STATEMENTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl DatabaseConfig {
    /// Returns the retry delay as a Duration.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns the idle timeout as a Duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Returns the acquire timeout, if one is configured.
    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Largest pool size reachable through overflow.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.target_size + self.target_size / 2
    }

    /// Size below which idle eviction never shrinks the pool.
    #[must_use]
    pub const fn min_size(&self) -> usize {
        self.target_size / 2
    }
}

/// Per-category TTLs in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheTtlConfig {
    /// Memoized query results.
    pub query: u64,
    /// User records.
    pub user_data: u64,
    /// Event records.
    pub event_data: u64,
    /// Media metadata.
    pub media_data: u64,
    /// Configuration values.
    pub config: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            query: 300,
            user_data: 1800,
            event_data: 600,
            media_data: 3600,
            config: 86_400,
        }
    }
}

/// Single-node Redis cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the cache tier (can be disabled for local development).
    pub enabled: bool,
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Redis password.
    pub password: Option<String>,
    /// Redis logical database.
    pub db: u32,
    /// Client-side connection pool size.
    pub pool_size: usize,
    /// Namespace prepended to every key.
    pub key_prefix: String,
    /// TTL used when a category has no configured TTL.
    pub default_ttl_secs: u64,
    /// Key count the maintenance task keeps the cache under.
    pub max_keys: u64,
    /// Maintenance interval in seconds.
    pub maintenance_interval_secs: u64,
    /// Per-category TTLs.
    pub ttl: CacheTtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            pool_size: 10,
            key_prefix: "lumen".to_string(),
            default_ttl_secs: 3600,
            max_keys: 10_000,
            maintenance_interval_secs: 300,
            ttl: CacheTtlConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Returns the Redis connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the maintenance interval as a Duration.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Distributed cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Comma-separated `host:port` list. Empty selects single-instance mode.
    pub nodes: String,
    /// Password shared by all cluster nodes.
    pub password: Option<String>,
    /// TTL used by `set` when the caller gives none.
    pub default_ttl_secs: u64,
    /// Seconds between PINGs while the cluster connection is down.
    pub reconnect_interval_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: String::new(),
            password: None,
            default_ttl_secs: 3600,
            reconnect_interval_secs: 5,
        }
    }
}

impl ClusterConfig {
    /// Returns the default TTL as a Duration.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the reconnect probe interval as a Duration.
    #[must_use]
    pub const fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Returns true when at least one cluster node is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.nodes.split(',').any(|node| !node.trim().is_empty())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging setup.
    pub logging: LoggingConfig,
    /// Install the Prometheus metrics recorder.
    pub metrics_enabled: bool,
    /// Address the Prometheus scrape endpoint listens on.
    pub metrics_addr: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9464".to_string(),
        }
    }
}
