//! Cluster node addresses and shard labels.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Port assumed when a node entry omits one.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Shard label for keys without a leading segment.
pub const DEFAULT_SHARD: &str = "default";

/// A `host:port` cluster endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterNode {
    pub host: String,
    pub port: u16,
}

impl ClusterNode {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host[:port]`. Returns `None` for blank entries.
    #[must_use]
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }

        let Some((host, port)) = entry.rsplit_once(':') else {
            return Some(Self::new(entry, DEFAULT_REDIS_PORT));
        };

        let port = port.trim().parse().unwrap_or_else(|_| {
            warn!(entry = %entry, "Unparsable cluster node port, using {}", DEFAULT_REDIS_PORT);
            DEFAULT_REDIS_PORT
        });
        Some(Self::new(host.trim(), port))
    }

    /// Connection URL for this node.
    #[must_use]
    pub fn url(&self, password: Option<&str>) -> String {
        match password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}", password, self.host, self.port)
            }
            _ => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses a comma-separated node list, skipping blank entries.
#[must_use]
pub fn parse_nodes(nodes: &str) -> Vec<ClusterNode> {
    nodes.split(',').filter_map(ClusterNode::parse).collect()
}

/// Shard label for a key: its first colon-delimited segment.
#[must_use]
pub fn shard_key(key: &str) -> &str {
    match key.split(':').next() {
        Some(segment) if !segment.is_empty() => segment,
        _ => DEFAULT_SHARD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_nodes("10.0.0.1:7000, 10.0.0.2 ,,cache-3:7002");
        assert_eq!(
            nodes,
            vec![
                ClusterNode::new("10.0.0.1", 7000),
                ClusterNode::new("10.0.0.2", 6379),
                ClusterNode::new("cache-3", 7002),
            ]
        );
        assert!(parse_nodes("").is_empty());
        assert!(parse_nodes(" , ").is_empty());
    }

    #[test]
    fn test_bad_port_falls_back() {
        assert_eq!(ClusterNode::parse("node:abc"), Some(ClusterNode::new("node", 6379)));
    }

    #[test]
    fn test_node_url() {
        let node = ClusterNode::new("10.0.0.1", 7000);
        assert_eq!(node.url(None), "redis://10.0.0.1:7000");
        assert_eq!(node.url(Some("pw")), "redis://:pw@10.0.0.1:7000");
        assert_eq!(node.to_string(), "10.0.0.1:7000");
    }

    #[test]
    fn test_shard_key() {
        assert_eq!(shard_key("lumen:user_data:1"), "lumen");
        assert_eq!(shard_key("session"), "session");
        assert_eq!(shard_key(":orphan"), "default");
        assert_eq!(shard_key(""), "default");
    }
}
