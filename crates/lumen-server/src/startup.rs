//! Server startup utilities.

use lumen_config::{AppConfig, ObservabilityConfig};
use lumen_core::{LumenError, LumenResult};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Installs the Prometheus recorder and its scrape endpoint, if enabled.
pub fn install_metrics(config: &ObservabilityConfig) -> LumenResult<()> {
    if !config.metrics_enabled {
        info!("Metrics disabled by configuration");
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics_addr
        .parse()
        .map_err(|e| LumenError::Configuration(format!("Invalid metrics address '{}': {}", config.metrics_addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| LumenError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    lumen_cache::metrics::register_metrics();
    info!(%addr, "Prometheus metrics endpoint listening");
    Ok(())
}

/// Prints server startup information.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Store:     {} (target {} connections)", config.database.url, config.database.target_size);
    if config.cache.enabled {
        info!("Cache:     redis://{}:{}/{}", config.cache.host, config.cache.port, config.cache.db);
    } else {
        info!("Cache:     disabled");
    }
    if config.cluster.is_configured() {
        info!("Cluster:   {}", config.cluster.nodes);
    } else {
        info!("Cluster:   single-instance");
    }
    if config.observability.metrics_enabled {
        info!("Metrics:   http://{}/metrics", config.observability.metrics_addr);
    }
    info!("{}", separator);
}
