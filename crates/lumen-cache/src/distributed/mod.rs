//! Cluster-aware cache coordination.
//!
//! [`DistributedCache`] fronts a Redis Cluster when nodes are configured and
//! falls back to a single-node backend otherwise. Shard routing and
//! cluster-wide pattern listing are not implemented: shard keys are computed
//! and logged, and pattern invalidation resolves no keys.

mod backend;
mod coordinator;
mod monitor;
mod node;
mod redis_cluster;

pub use backend::{parse_cluster_nodes, parse_info, ClusterBackend, ClusterConnector, ClusterEvent, ClusterNodeStatus};
pub use coordinator::{ClusterHealth, ConsistencyReport, CoordinatorState, DistributedCache};
pub use monitor::{ConnectionMonitor, DEFAULT_RECONNECT_INTERVAL};
pub use node::{parse_nodes, shard_key, ClusterNode, DEFAULT_REDIS_PORT, DEFAULT_SHARD};
pub use redis_cluster::{RedisClusterBackend, RedisClusterConnector};
