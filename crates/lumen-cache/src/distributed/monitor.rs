//! Connectivity tracking for cluster clients.
//!
//! A client reports every command outcome to its [`ConnectionMonitor`]. The
//! first connection-level failure flips the monitor to unhealthy and emits
//! [`ClusterEvent::Error`]. From then on the recovery task probes the client
//! on a fixed interval, and the first successful probe or command emits
//! [`ClusterEvent::Ready`].

use super::backend::ClusterEvent;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

/// Default pause between recovery probes.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Health state and event stream shared by a cluster client and its recovery task.
#[derive(Debug)]
pub struct ConnectionMonitor {
    events: broadcast::Sender<ClusterEvent>,
    health: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    /// Creates a monitor for a client that starts out healthy.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (health, _) = watch::channel(true);
        Self {
            events,
            health,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        *self.health.borrow()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Records a successful round-trip. Emits `Ready` when leaving the unhealthy state.
    pub fn record_success(&self) {
        if self.is_closed() {
            return;
        }
        if !self.health.send_replace(true) {
            info!("Redis cluster connection recovered");
            let _ = self.events.send(ClusterEvent::Ready);
        }
    }

    /// Records a connection-level failure. Emits `Error` when leaving the healthy state.
    pub fn record_failure(&self, error: &str) {
        if self.is_closed() {
            return;
        }
        if self.health.send_replace(false) {
            warn!(error = %error, "Redis cluster connection lost");
            let _ = self.events.send(ClusterEvent::Error(error.to_string()));
        }
    }

    /// Marks the client closed and emits `End` once.
    ///
    /// Returns false if the monitor was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.events.send(ClusterEvent::End);
        true
    }

    /// Spawns the task that probes an unhealthy client until it answers again.
    ///
    /// The task idles while the client is healthy and exits once the monitor
    /// is closed. Callers abort the returned handle when they drop the client.
    pub fn spawn_recovery<P, Fut>(self: &Arc<Self>, interval: Duration, probe: P) -> JoinHandle<()>
    where
        P: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let monitor = Arc::clone(self);
        let mut health = self.health.subscribe();

        tokio::spawn(async move {
            loop {
                let dropped = health.wait_for(|healthy| !*healthy).await.is_err();
                if dropped || monitor.is_closed() {
                    break;
                }

                tokio::time::sleep(interval).await;
                if monitor.is_closed() {
                    break;
                }
                if monitor.is_healthy() {
                    continue;
                }

                debug!("Probing Redis cluster connection");
                if probe().await {
                    monitor.record_success();
                }
            }
            debug!("Cluster recovery task stopped");
        })
    }
}
