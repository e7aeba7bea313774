//! Redis Cluster client built on `redis::cluster_async`.

use super::backend::{parse_cluster_nodes, ClusterBackend, ClusterConnector, ClusterEvent, ClusterNodeStatus};
use super::monitor::{ConnectionMonitor, DEFAULT_RECONNECT_INTERVAL};
use super::node::ClusterNode;
use crate::backend::CacheBackend;
use async_trait::async_trait;
use lumen_core::{LumenError, LumenResult};
use parking_lot::Mutex;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncCommands, RedisError, RedisResult, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Connects to a Redis Cluster from its seed nodes.
#[derive(Debug, Clone)]
pub struct RedisClusterConnector {
    password: Option<String>,
    reconnect_interval: Duration,
}

impl Default for RedisClusterConnector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RedisClusterConnector {
    #[must_use]
    pub fn new(password: Option<String>) -> Self {
        Self {
            password,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }

    /// Sets the pause between reconnect probes after a connection loss.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}

#[async_trait]
impl ClusterConnector for RedisClusterConnector {
    async fn connect(&self, nodes: &[ClusterNode]) -> LumenResult<Arc<dyn ClusterBackend>> {
        let urls: Vec<String> = nodes
            .iter()
            .map(|node| node.url(self.password.as_deref()))
            .collect();

        info!(nodes = nodes.len(), "Connecting to Redis cluster...");

        let client = ClusterClient::new(urls)
            .map_err(|e| LumenError::Configuration(format!("Invalid cluster nodes: {}", e)))?;
        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| LumenError::Cache(format!("Failed to connect to Redis cluster: {}", e)))?;

        info!("Redis cluster connection established");
        Ok(Arc::new(RedisClusterBackend::new(conn, self.reconnect_interval)))
    }
}

/// A live cluster connection.
///
/// Connectivity events come from a [`ConnectionMonitor`] fed with command
/// outcomes. After a connection-level failure a background task PINGs the
/// cluster until it answers, so the coordinator sees `Ready` again without
/// sending traffic of its own.
pub struct RedisClusterBackend {
    conn: Mutex<Option<ClusterConnection>>,
    monitor: Arc<ConnectionMonitor>,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl RedisClusterBackend {
    fn new(conn: ClusterConnection, reconnect_interval: Duration) -> Self {
        let monitor = Arc::new(ConnectionMonitor::new());
        let probe_conn = conn.clone();
        let recovery = monitor.spawn_recovery(reconnect_interval, move || {
            let mut conn = probe_conn.clone();
            async move { redis::cmd("PING").query_async::<Value>(&mut conn).await.is_ok() }
        });

        Self {
            conn: Mutex::new(Some(conn)),
            monitor,
            recovery: Mutex::new(Some(recovery)),
        }
    }

    fn connection(&self) -> LumenResult<ClusterConnection> {
        self.conn
            .lock()
            .clone()
            .ok_or_else(|| LumenError::Cache("Cluster connection is closed".to_string()))
    }

    fn observe<T>(&self, op: &str, result: RedisResult<T>) -> LumenResult<T> {
        match result {
            Ok(value) => {
                self.monitor.record_success();
                Ok(value)
            }
            Err(e) => {
                if is_connection_error(&e) {
                    self.monitor.record_failure(&e.to_string());
                }
                Err(LumenError::Cache(format!("Cluster {} failed: {}", op, e)))
            }
        }
    }

    fn stop_recovery(&self) {
        if let Some(task) = self.recovery.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RedisClusterBackend {
    fn drop(&mut self) {
        self.stop_recovery();
    }
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Flattens replies that the cluster client may aggregate per node.
fn value_to_text(value: Value) -> String {
    match value {
        Value::BulkString(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::SimpleString(text) | Value::VerbatimString { text, .. } => text,
        Value::Okay => "OK".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Array(items) | Value::Set(items) => items
            .into_iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Map(pairs) => pairs
            .into_iter()
            .map(|(_, value)| value_to_text(value))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

#[async_trait]
impl CacheBackend for RedisClusterBackend {
    async fn get(&self, key: &str) -> LumenResult<Option<String>> {
        let mut conn = self.connection()?;
        let result = conn.get(key).await;
        self.observe("GET", result)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> LumenResult<()> {
        let mut conn = self.connection()?;
        let result = conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1)).await;
        self.observe("SETEX", result)
    }

    async fn del(&self, keys: &[String]) -> LumenResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;
        let mut deleted = 0u64;
        // Keys may live in different slots, so delete one at a time
        for key in keys {
            let result: RedisResult<i64> = conn.del(key).await;
            deleted += self.observe("DEL", result)?.max(0) as u64;
        }
        Ok(deleted)
    }

    async fn keys(&self, pattern: &str) -> LumenResult<Vec<String>> {
        let mut conn = self.connection()?;
        let result = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await;
        self.observe("KEYS", result)
    }

    async fn ttl(&self, key: &str) -> LumenResult<i64> {
        let mut conn = self.connection()?;
        let result = conn.ttl(key).await;
        self.observe("TTL", result)
    }

    async fn dbsize(&self) -> LumenResult<u64> {
        let mut conn = self.connection()?;
        let result = redis::cmd("DBSIZE").query_async(&mut conn).await;
        self.observe("DBSIZE", result)
    }

    async fn ping(&self) -> LumenResult<String> {
        let mut conn = self.connection()?;
        let result = redis::cmd("PING").query_async::<Value>(&mut conn).await;
        self.observe("PING", result).map(value_to_text)
    }

    async fn info(&self, section: &str) -> LumenResult<String> {
        let mut conn = self.connection()?;
        let result = redis::cmd("INFO").arg(section).query_async::<Value>(&mut conn).await;
        self.observe("INFO", result).map(value_to_text)
    }
}

#[async_trait]
impl ClusterBackend for RedisClusterBackend {
    fn as_cache(&self) -> &dyn CacheBackend {
        self
    }

    async fn cluster_info(&self) -> LumenResult<String> {
        let mut conn = self.connection()?;
        let result = redis::cmd("CLUSTER")
            .arg("INFO")
            .query_async::<Value>(&mut conn)
            .await;
        self.observe("CLUSTER INFO", result).map(value_to_text)
    }

    async fn cluster_nodes(&self) -> LumenResult<Vec<ClusterNodeStatus>> {
        let mut conn = self.connection()?;
        let result = redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async::<Value>(&mut conn)
            .await;
        let text = self.observe("CLUSTER NODES", result).map(value_to_text)?;
        Ok(parse_cluster_nodes(&text))
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.monitor.subscribe()
    }

    async fn close(&self) -> LumenResult<()> {
        self.stop_recovery();
        if self.conn.lock().take().is_some() {
            debug!("Closing Redis cluster connection");
            self.monitor.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(Value::BulkString(b"cluster_state:ok".to_vec())), "cluster_state:ok");
        assert_eq!(value_to_text(Value::SimpleString("PONG".to_string())), "PONG");
        assert_eq!(
            value_to_text(Value::Map(vec![
                (Value::SimpleString("a:1".to_string()), Value::BulkString(b"x:1".to_vec())),
                (Value::SimpleString("b:2".to_string()), Value::BulkString(b"y:2".to_vec())),
            ])),
            "x:1\ny:2"
        );
        assert_eq!(value_to_text(Value::Nil), "");
    }
}
