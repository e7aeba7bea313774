//! Common test infrastructure for cache tests.
//!
//! Provides a scriptable in-process cluster client.

#![allow(dead_code)]

use async_trait::async_trait;
use lumen_cache::{
    CacheBackend, ClusterBackend, ClusterConnector, ClusterEvent, ClusterNode, ClusterNodeStatus, ConnectionMonitor,
    MemoryBackend,
};
use lumen_config::ClusterConfig;
use lumen_core::{LumenError, LumenResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Pause between recovery probes of the fake cluster.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// A cluster client backed by a [`MemoryBackend`].
///
/// Command failures (`set_failing`) are plain errors. Losing reachability
/// (`set_reachable(false)`) is a connection-level failure reported through a
/// [`ConnectionMonitor`], which probes the fake until it is reachable again.
pub struct FakeCluster {
    pub store: MemoryBackend,
    pub monitor: Arc<ConnectionMonitor>,
    pub failing: AtomicBool,
    pub reachable: Arc<AtomicBool>,
    pub closed: AtomicUsize,
    pub cluster_state: Mutex<String>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        let monitor = Arc::new(ConnectionMonitor::new());
        let reachable = Arc::new(AtomicBool::new(true));
        let recovery = {
            let reachable = Arc::clone(&reachable);
            monitor.spawn_recovery(RECONNECT_INTERVAL, move || {
                let reachable = reachable.load(Ordering::SeqCst);
                async move { reachable }
            })
        };

        Arc::new(Self {
            store: MemoryBackend::new(),
            monitor,
            failing: AtomicBool::new(false),
            reachable,
            closed: AtomicUsize::new(0),
            cluster_state: Mutex::new("ok".to_string()),
            recovery: Mutex::new(Some(recovery)),
        })
    }

    /// Makes every command fail until called again with `false`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Simulates losing or regaining the network path to the cluster.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self) -> LumenResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            self.monitor.record_failure("Connection refused (os error 111)");
            return Err(LumenError::cache("Connection refused (os error 111)"));
        }
        self.monitor.record_success();
        if self.failing.load(Ordering::SeqCst) {
            return Err(LumenError::cache("CLUSTERDOWN The cluster is down"));
        }
        Ok(())
    }

    fn stop_recovery(&self) {
        if let Some(task) = self.recovery.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for FakeCluster {
    fn drop(&mut self) {
        self.stop_recovery();
    }
}

#[async_trait]
impl CacheBackend for FakeCluster {
    async fn get(&self, key: &str) -> LumenResult<Option<String>> {
        self.check()?;
        self.store.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> LumenResult<()> {
        self.check()?;
        self.store.set_ex(key, value, ttl_secs).await
    }

    async fn del(&self, keys: &[String]) -> LumenResult<u64> {
        self.check()?;
        self.store.del(keys).await
    }

    async fn keys(&self, pattern: &str) -> LumenResult<Vec<String>> {
        self.check()?;
        self.store.keys(pattern).await
    }

    async fn ttl(&self, key: &str) -> LumenResult<i64> {
        self.check()?;
        self.store.ttl(key).await
    }

    async fn dbsize(&self) -> LumenResult<u64> {
        self.check()?;
        self.store.dbsize().await
    }

    async fn ping(&self) -> LumenResult<String> {
        self.check()?;
        Ok("PONG".to_string())
    }

    async fn info(&self, section: &str) -> LumenResult<String> {
        self.check()?;
        self.store.info(section).await
    }
}

#[async_trait]
impl ClusterBackend for FakeCluster {
    fn as_cache(&self) -> &dyn CacheBackend {
        self
    }

    async fn cluster_info(&self) -> LumenResult<String> {
        self.check()?;
        let cluster_state = self.cluster_state.lock().unwrap().clone();
        Ok(format!(
            "cluster_state:{}\r\ncluster_slots_assigned:16384\r\ncluster_known_nodes:3\r\n",
            cluster_state
        ))
    }

    async fn cluster_nodes(&self) -> LumenResult<Vec<ClusterNodeStatus>> {
        self.check()?;
        Ok(vec![
            node_status("a", "10.0.0.1:7000", true),
            node_status("b", "10.0.0.2:7001", true),
            node_status("c", "10.0.0.3:7002", false),
        ])
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.monitor.subscribe()
    }

    async fn close(&self) -> LumenResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.stop_recovery();
        self.monitor.close();
        Ok(())
    }
}

fn node_status(id: &str, address: &str, connected: bool) -> ClusterNodeStatus {
    ClusterNodeStatus {
        id: id.to_string(),
        address: address.to_string(),
        role: "master".to_string(),
        connected,
    }
}

/// Hands out a shared [`FakeCluster`], or refuses to connect.
pub struct FakeConnector {
    pub cluster: Arc<FakeCluster>,
    pub refuse: bool,
    pub connects: AtomicUsize,
    pub seen_nodes: Mutex<Vec<ClusterNode>>,
}

impl FakeConnector {
    pub fn new(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            refuse: false,
            connects: AtomicUsize::new(0),
            seen_nodes: Mutex::new(Vec::new()),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            cluster: FakeCluster::new(),
            refuse: true,
            connects: AtomicUsize::new(0),
            seen_nodes: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, nodes: &[ClusterNode]) -> LumenResult<Arc<dyn ClusterBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.seen_nodes.lock().unwrap() = nodes.to_vec();
        if self.refuse {
            return Err(LumenError::cache("Connection refused"));
        }
        let cluster: Arc<dyn ClusterBackend> = self.cluster.clone();
        Ok(cluster)
    }
}

pub fn cluster_config(nodes: &str) -> ClusterConfig {
    ClusterConfig {
        nodes: nodes.to_string(),
        ..Default::default()
    }
}

/// Lets spawned tasks run until they park.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
