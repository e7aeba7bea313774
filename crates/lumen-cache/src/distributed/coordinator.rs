//! Distributed cache coordinator.

use super::backend::{parse_info, ClusterBackend, ClusterConnector, ClusterEvent, ClusterNodeStatus};
use super::node::{parse_nodes, shard_key, ClusterNode};
use crate::backend::CacheBackend;
use crate::metrics::names;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use chrono::{DateTime, Utc};
use lumen_config::ClusterConfig;
use lumen_core::LumenResult;
use metrics::histogram;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Uninitialized,
    /// No cluster configured; operations use the single-node backend, if any.
    SingleInstance,
    Connecting,
    Connected,
    Disconnected,
    Shutdown,
}

impl CoordinatorState {
    /// Whether operations are served in this state.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::SingleInstance | Self::Connected)
    }
}

/// Outcome of [`DistributedCache::ensure_cache_consistency`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConsistencyReport<T> {
    /// The cached value already matched.
    Consistent,
    /// The cached value differed (or was absent) and was overwritten.
    Updated {
        cached_value: Option<T>,
        expected_value: T,
    },
    /// The coordinator is not connected.
    Unavailable,
    /// The check or the repair failed.
    Failed { error: String },
}

impl<T> ConsistencyReport<T> {
    /// True only when the cache already held the expected value.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }
}

/// Cluster health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub healthy: bool,
    pub state: CoordinatorState,
    pub node_count: usize,
    pub connected_nodes: usize,
    pub nodes: Vec<ClusterNodeStatus>,
    /// Parsed `CLUSTER INFO` fields.
    pub info: BTreeMap<String, String>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Where operations are routed.
enum Route {
    Cluster(Arc<dyn ClusterBackend>),
    Single(Arc<dyn CacheBackend>),
}

impl Route {
    fn cache(&self) -> &dyn CacheBackend {
        match self {
            Self::Cluster(client) => client.as_cache(),
            Self::Single(backend) => backend.as_ref(),
        }
    }
}

/// Cluster-aware cache front end.
///
/// Operations never fail: when the coordinator is not connected, or the
/// client errors, they log and return `None`, `false`, or zero.
pub struct DistributedCache {
    config: ClusterConfig,
    connector: Arc<dyn ClusterConnector>,
    single: Option<Arc<dyn CacheBackend>>,
    nodes: RwLock<Vec<ClusterNode>>,
    client: RwLock<Option<Arc<dyn ClusterBackend>>>,
    state: Arc<RwLock<CoordinatorState>>,
    stats: CacheStats,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedCache {
    /// Creates an uninitialized coordinator.
    #[must_use]
    pub fn new(config: ClusterConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            config,
            connector,
            single: None,
            nodes: RwLock::new(Vec::new()),
            client: RwLock::new(None),
            state: Arc::new(RwLock::new(CoordinatorState::Uninitialized)),
            stats: CacheStats::new("cluster"),
            listener: Mutex::new(None),
        }
    }

    /// Backend used in single-instance mode.
    #[must_use]
    pub fn with_single_instance(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.single = Some(backend);
        self
    }

    /// Parses the node list and connects. Only the first call has an effect.
    pub async fn init(&self) -> CoordinatorState {
        let nodes = {
            let mut state = self.state.write();
            if *state != CoordinatorState::Uninitialized {
                return *state;
            }

            let nodes = parse_nodes(&self.config.nodes);
            if nodes.is_empty() {
                info!("No cluster nodes configured, running in single-instance mode");
                *state = CoordinatorState::SingleInstance;
                return *state;
            }

            *state = CoordinatorState::Connecting;
            *self.nodes.write() = nodes.clone();
            nodes
        };

        match self.connector.connect(&nodes).await {
            Ok(client) => {
                let events = client.subscribe();
                *self.client.write() = Some(Arc::clone(&client));
                transition(&self.state, CoordinatorState::Connected);

                if *self.state.read() == CoordinatorState::Shutdown {
                    // Shut down while connecting
                    self.client.write().take();
                    if let Err(e) = client.close().await {
                        warn!(error = %e, "Failed to close cluster client");
                    }
                } else {
                    self.spawn_listener(events);
                    info!(nodes = nodes.len(), "Distributed cache connected");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to cache cluster");
                transition(&self.state, CoordinatorState::Disconnected);
            }
        }

        *self.state.read()
    }

    fn spawn_listener(&self, mut events: tokio::sync::broadcast::Receiver<ClusterEvent>) {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClusterEvent::Ready) => {
                        transition(&state, CoordinatorState::Connected);
                    }
                    Ok(ClusterEvent::Error(message)) => {
                        warn!(error = %message, "Cache cluster reported an error");
                        transition(&state, CoordinatorState::Disconnected);
                    }
                    Ok(ClusterEvent::End) => {
                        transition(&state, CoordinatorState::Disconnected);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Cluster event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self.listener.lock() = Some(handle);
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Nodes parsed at initialization.
    #[must_use]
    pub fn nodes(&self) -> Vec<ClusterNode> {
        self.nodes.read().clone()
    }

    fn route(&self) -> Option<Route> {
        match self.state() {
            CoordinatorState::Connected => self.client.read().clone().map(Route::Cluster),
            CoordinatorState::SingleInstance => self.single.clone().map(Route::Single),
            _ => None,
        }
    }

    fn record(&self, op: &'static str, started: Instant) {
        self.stats.record_cluster_operation(op);
        histogram!(names::CLUSTER_OPERATION_DURATION, "op" => op).record(started.elapsed().as_secs_f64());
    }

    async fn get_raw(&self, route: &Route, key: &str) -> LumenResult<Option<String>> {
        let started = Instant::now();
        let result = route.cache().get(key).await;
        self.record("get", started);
        result
    }

    async fn set_raw(&self, route: &Route, key: &str, raw: &str, ttl: Option<Duration>) -> LumenResult<()> {
        let ttl_secs = ttl.unwrap_or_else(|| self.config.default_ttl()).as_secs().max(1);
        let started = Instant::now();
        let result = route.cache().set_ex(key, raw, ttl_secs).await;
        self.record("set", started);
        result
    }

    /// Reads and deserializes a value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let route = self.route()?;

        match self.get_raw(&route, key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.stats.record_hit();
                    Some(value)
                }
                Err(e) => {
                    self.stats.record_miss();
                    self.stats.record_error();
                    warn!(key = %key, error = %e, "Failed to decode cluster cache value");
                    None
                }
            },
            Ok(None) => {
                self.stats.record_miss();
                None
            }
            Err(e) => {
                self.stats.record_miss();
                self.stats.record_error();
                warn!(key = %key, error = %e, "Cluster cache get failed");
                None
            }
        }
    }

    /// Serializes and stores a value; `ttl` defaults to `default_ttl_secs`.
    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let Some(route) = self.route() else {
            return false;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Failed to encode cluster cache value");
                return false;
            }
        };

        match self.set_raw(&route, key, &raw, ttl).await {
            Ok(()) => {
                self.stats.record_set();
                true
            }
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Cluster cache set failed");
                false
            }
        }
    }

    /// Removes a key. Returns whether it existed.
    pub async fn del(&self, key: &str) -> bool {
        let Some(route) = self.route() else {
            return false;
        };

        let started = Instant::now();
        let result = route.cache().del(&[key.to_string()]).await;
        self.record("del", started);

        match result {
            Ok(deleted) => {
                self.stats.record_deletes(deleted);
                deleted > 0
            }
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Cluster cache del failed");
                false
            }
        }
    }

    /// Shard label for a key: its first colon-delimited segment, or `"default"`.
    #[must_use]
    pub fn get_shard_key(&self, key: &str) -> String {
        shard_key(key).to_string()
    }

    /// Shard-aware read. Routing by shard is not implemented; this is [`DistributedCache::get`].
    pub async fn cluster_get<T: DeserializeOwned>(&self, key: &str, shard: Option<&str>) -> Option<T> {
        let shard = shard.map_or_else(|| self.get_shard_key(key), ToString::to_string);
        debug!(key = %key, shard = %shard, "Cluster get");
        self.get(key).await
    }

    /// Shard-aware write. Routing by shard is not implemented; this is [`DistributedCache::set`].
    pub async fn cluster_set<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        shard: Option<&str>,
    ) -> bool {
        let shard = shard.map_or_else(|| self.get_shard_key(key), ToString::to_string);
        debug!(key = %key, shard = %shard, "Cluster set");
        self.set(key, value, ttl).await
    }

    /// Compares the cached value with `expected` and overwrites it on mismatch.
    pub async fn ensure_cache_consistency<T>(&self, key: &str, expected: &T) -> ConsistencyReport<T>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Sync,
    {
        let Some(route) = self.route() else {
            return ConsistencyReport::Unavailable;
        };

        let cached = match self.get_raw(&route, key).await {
            Ok(raw) => raw.and_then(|raw| serde_json::from_str::<T>(&raw).ok()),
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Consistency check could not read key");
                return ConsistencyReport::Failed { error: e.to_string() };
            }
        };

        if cached.as_ref() == Some(expected) {
            return ConsistencyReport::Consistent;
        }

        let raw = match serde_json::to_string(expected) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.record_error();
                return ConsistencyReport::Failed { error: e.to_string() };
            }
        };

        match self.set_raw(&route, key, &raw, None).await {
            Ok(()) => {
                self.stats.record_set();
                info!(key = %key, "Repaired inconsistent cache entry");
                ConsistencyReport::Updated {
                    cached_value: cached,
                    expected_value: expected.clone(),
                }
            }
            Err(e) => {
                self.stats.record_error();
                warn!(key = %key, error = %e, "Consistency repair failed");
                ConsistencyReport::Failed { error: e.to_string() }
            }
        }
    }

    /// Probes the cluster and summarizes node connectivity.
    pub async fn get_cluster_health(&self) -> ClusterHealth {
        let state = self.state();
        let mut health = ClusterHealth {
            healthy: false,
            state,
            node_count: 0,
            connected_nodes: 0,
            nodes: Vec::new(),
            info: BTreeMap::new(),
            error: None,
            checked_at: Utc::now(),
        };

        match self.route() {
            None => {
                health.error = Some(format!("Cache cluster not connected ({:?})", state));
            }
            Some(Route::Single(backend)) => match backend.ping().await {
                Ok(_) => {
                    health.healthy = true;
                    health.node_count = 1;
                    health.connected_nodes = 1;
                }
                Err(e) => health.error = Some(e.to_string()),
            },
            Some(Route::Cluster(client)) => {
                let probe = async {
                    let info = client.cluster_info().await?;
                    let nodes = client.cluster_nodes().await?;
                    Ok::<_, lumen_core::LumenError>((info, nodes))
                }
                .await;

                match probe {
                    Ok((info, nodes)) => {
                        health.info = parse_info(&info);
                        health.node_count = nodes.len();
                        health.connected_nodes = nodes.iter().filter(|node| node.connected).count();
                        health.nodes = nodes;
                        health.healthy = health
                            .info
                            .get("cluster_state")
                            .map_or(true, |cluster_state| cluster_state == "ok");
                    }
                    Err(e) => {
                        self.stats.record_error();
                        warn!(error = %e, "Cluster health probe failed");
                        health.error = Some(e.to_string());
                    }
                }
            }
        }

        health
    }

    /// Deletes keys matching `pattern` across the cluster.
    ///
    /// Listing keys by pattern across cluster nodes is not supported, so no
    /// keys resolve and nothing is deleted. Returns the number deleted.
    pub async fn invalidate_cluster_cache(&self, pattern: &str) -> u64 {
        let Some(route) = self.route() else {
            return 0;
        };

        let keys = self.resolve_keys(pattern);
        let mut deleted = 0;
        for key in &keys {
            match route.cache().del(std::slice::from_ref(key)).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    self.stats.record_error();
                    warn!(key = %key, error = %e, "Cluster invalidation delete failed");
                }
            }
        }

        self.stats.record_deletes(deleted);
        info!(pattern = %pattern, deleted, "Invalidated cluster cache");
        deleted
    }

    fn resolve_keys(&self, pattern: &str) -> Vec<String> {
        debug!(pattern = %pattern, "Pattern key resolution is not supported across the cluster");
        Vec::new()
    }

    #[must_use]
    pub fn get_stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Closes the cluster client and stops event handling. Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state == CoordinatorState::Shutdown {
                return;
            }
            *state = CoordinatorState::Shutdown;
        }

        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }

        let client = self.client.write().take();
        if let Some(client) = client {
            if let Err(e) = client.close().await {
                warn!(error = %e, "Failed to close cluster client");
            }
        }

        info!("Distributed cache shut down");
    }
}

impl std::fmt::Debug for DistributedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("state", &self.state())
            .field("nodes", &self.nodes.read().len())
            .field("single_instance_backend", &self.single.is_some())
            .finish_non_exhaustive()
    }
}

/// Moves to `next` unless the coordinator has been shut down.
fn transition(state: &RwLock<CoordinatorState>, next: CoordinatorState) {
    let mut current = state.write();
    if *current == CoordinatorState::Shutdown || *current == next {
        return;
    }
    info!(from = ?*current, to = ?next, "Distributed cache state change");
    *current = next;
}
