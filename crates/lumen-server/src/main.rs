//! # Lumen Server
//!
//! Runs the connection pool, cache service, and distributed cache
//! coordinator until a shutdown signal arrives.

use lumen_config::ConfigLoader;
use lumen_core::telemetry::init_logging;
use lumen_core::LumenResult;
use lumen_server::startup::{install_metrics, print_startup_info};
use lumen_server::AppServices;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("lumen-server: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> LumenResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_logging(&config.observability.logging)?;

    info!("Starting Lumen Server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    install_metrics(&config.observability)?;
    print_startup_info(&config);

    let services = AppServices::build(&config).await?;
    info!(
        pool = ?services.pool.get_pool_stats(),
        cluster = ?services.distributed.state(),
        "Services ready"
    );

    shutdown_signal().await;

    services.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
