//! Periodic cache maintenance task.

use crate::service::CacheService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle to a running maintenance task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signals the task to stop and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Cache maintenance task ended abnormally");
        }
    }

    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl CacheService {
    /// Runs [`CacheService::run_maintenance`] every `maintenance_interval_secs`.
    ///
    /// The first pass happens one full interval after spawning.
    #[must_use]
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        spawn_maintenance_every(Arc::clone(self), self.config().maintenance_interval())
    }
}

fn spawn_maintenance_every(cache: Arc<CacheService>, period: Duration) -> MaintenanceHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Starting cache maintenance task");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Cache maintenance task received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = cache.run_maintenance().await;
                    debug!(evicted, "Cache maintenance pass complete");
                }
            }
        }
    });

    MaintenanceHandle { shutdown_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheBackend, MemoryBackend};
    use lumen_config::CacheConfig;

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_runs_on_interval_and_stops() {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            max_keys: 10,
            maintenance_interval_secs: 60,
            ..Default::default()
        };
        let cache = Arc::new(CacheService::new(backend.clone(), config));

        for i in 0..10u64 {
            backend
                .set_ex(&format!("lumen:event_data:{}", i), "{}", 3600 + i)
                .await
                .unwrap();
        }

        let handle = cache.spawn_maintenance();
        tokio::task::yield_now().await;
        assert_eq!(backend.len(), 10);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(backend.len(), 9);
        assert_eq!(backend.get("lumen:event_data:0").await.unwrap(), None);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_first_pass() {
        let cache = Arc::new(CacheService::new(
            Arc::new(MemoryBackend::new()),
            CacheConfig::default(),
        ));
        let handle = cache.spawn_maintenance();
        handle.stop().await;
    }
}
