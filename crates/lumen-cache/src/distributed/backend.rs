//! Cluster client seam and reply parsing.

use super::node::ClusterNode;
use crate::backend::CacheBackend;
use async_trait::async_trait;
use lumen_core::LumenResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Connectivity changes reported by a cluster client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// The client can serve commands again.
    Ready,
    /// The client hit a connection-level failure.
    Error(String),
    /// The client was closed.
    End,
}

/// One line of `CLUSTER NODES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNodeStatus {
    pub id: String,
    pub address: String,
    /// `master` or `replica`.
    pub role: String,
    pub connected: bool,
}

/// A connected cluster client.
#[async_trait]
pub trait ClusterBackend: CacheBackend {
    /// The client as a plain key-value backend.
    fn as_cache(&self) -> &dyn CacheBackend;

    /// Raw `CLUSTER INFO` text.
    async fn cluster_info(&self) -> LumenResult<String>;

    /// Parsed `CLUSTER NODES` reply.
    async fn cluster_nodes(&self) -> LumenResult<Vec<ClusterNodeStatus>>;

    /// Subscribes to connectivity events.
    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;

    /// Closes the client. Later commands fail.
    async fn close(&self) -> LumenResult<()>;
}

/// Opens cluster clients.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, nodes: &[ClusterNode]) -> LumenResult<Arc<dyn ClusterBackend>>;
}

/// Parses `key:value` lines from `INFO` or `CLUSTER INFO`, skipping `#` headers.
#[must_use]
pub fn parse_info(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Parses a `CLUSTER NODES` reply.
///
/// Each line is `<id> <ip:port@cport> <flags> <master> <ping> <pong> <epoch> <link-state> <slots>...`.
#[must_use]
pub fn parse_cluster_nodes(text: &str) -> Vec<ClusterNodeStatus> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return None;
            }

            let address = fields[1].split('@').next().unwrap_or(fields[1]);
            let flags = fields[2];
            let role = if flags.split(',').any(|flag| flag == "master") {
                "master"
            } else {
                "replica"
            };
            let failing = flags.split(',').any(|flag| flag == "fail" || flag == "noaddr");

            Some(ClusterNodeStatus {
                id: fields[0].to_string(),
                address: address.to_string(),
                role: role.to_string(),
                connected: fields[7] == "connected" && !failing,
            })
        })
        .collect()
}
