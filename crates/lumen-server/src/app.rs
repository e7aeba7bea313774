//! Service wiring.

use lumen_cache::{
    CacheBackend, CacheService, CoordinatorState, DistributedCache, MaintenanceHandle, RedisBackend,
    RedisClusterConnector,
};
use lumen_config::AppConfig;
use lumen_core::LumenResult;
use lumen_pool::{create_sqlite_pool, ConnectionPool, SqliteConnector};
use std::sync::Arc;
use tracing::{info, warn};

/// Long-lived services, constructed once per process.
pub struct AppServices {
    pub pool: ConnectionPool<SqliteConnector>,
    pub cache: Arc<CacheService>,
    pub distributed: Arc<DistributedCache>,
    maintenance: Option<MaintenanceHandle>,
}

impl AppServices {
    /// Connects every tier described by `config`.
    ///
    /// The store must be reachable. An unreachable Redis disables the cache
    /// tier instead of failing startup.
    pub async fn build(config: &AppConfig) -> LumenResult<Self> {
        let backend: Option<Arc<dyn CacheBackend>> = if config.cache.enabled {
            match RedisBackend::connect(&config.cache).await {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, continuing without cache");
                    None
                }
            }
        } else {
            info!("Cache disabled by configuration");
            None
        };

        Self::assemble(config, backend).await
    }

    /// Builds the services over an already-connected cache backend.
    pub async fn assemble(config: &AppConfig, backend: Option<Arc<dyn CacheBackend>>) -> LumenResult<Self> {
        let pool = create_sqlite_pool(&config.database).await?;

        let cache = match &backend {
            Some(backend) => CacheService::new(Arc::clone(backend), config.cache.clone()),
            None => CacheService::disabled(config.cache.clone()),
        };
        let cache = Arc::new(cache.with_query_executor(Arc::new(pool.clone())));

        let maintenance = cache.is_enabled().then(|| cache.spawn_maintenance());

        let connector = Arc::new(
            RedisClusterConnector::new(config.cluster.password.clone())
                .with_reconnect_interval(config.cluster.reconnect_interval()),
        );
        let mut distributed = DistributedCache::new(config.cluster.clone(), connector);
        if let Some(backend) = backend {
            distributed = distributed.with_single_instance(backend);
        }
        let distributed = Arc::new(distributed);

        let state = distributed.init().await;
        if state == CoordinatorState::Disconnected {
            warn!("Distributed cache unavailable; cluster operations will be no-ops");
        }

        Ok(Self {
            pool,
            cache,
            distributed,
            maintenance,
        })
    }

    /// Stops background work and closes every connection.
    pub async fn shutdown(mut self) {
        if let Some(maintenance) = self.maintenance.take() {
            maintenance.stop().await;
        }
        self.distributed.shutdown().await;
        self.pool.close_all().await;
        info!("All services shut down");
    }
}
