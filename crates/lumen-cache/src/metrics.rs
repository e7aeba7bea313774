//! Prometheus metric names and descriptions for the cache tiers.

use metrics::{describe_counter, describe_histogram};

/// Metric names for the cache tiers.
pub mod names {
    /// Cache reads that found a value.
    pub const CACHE_HITS_TOTAL: &str = "lumen_cache_hits_total";
    /// Cache reads that found nothing.
    pub const CACHE_MISSES_TOTAL: &str = "lumen_cache_misses_total";
    /// Successful cache writes.
    pub const CACHE_SETS_TOTAL: &str = "lumen_cache_sets_total";
    /// Keys removed by deletes, invalidation, or maintenance.
    pub const CACHE_DELETES_TOTAL: &str = "lumen_cache_deletes_total";
    /// Backend or decode failures absorbed by the cache.
    pub const CACHE_ERRORS_TOTAL: &str = "lumen_cache_errors_total";
    /// Keys evicted by the maintenance task.
    pub const CACHE_EVICTIONS_TOTAL: &str = "lumen_cache_evictions_total";

    /// Operations routed through the distributed coordinator.
    pub const CLUSTER_OPERATIONS_TOTAL: &str = "lumen_cluster_operations_total";
    /// Distributed coordinator operation latency in seconds.
    pub const CLUSTER_OPERATION_DURATION: &str = "lumen_cluster_operation_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Total number of cache hits");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Total number of cache misses");
    describe_counter!(names::CACHE_SETS_TOTAL, "Total number of cache writes");
    describe_counter!(
        names::CACHE_DELETES_TOTAL,
        "Total number of cache keys deleted"
    );
    describe_counter!(
        names::CACHE_ERRORS_TOTAL,
        "Total number of cache backend or decode failures"
    );
    describe_counter!(
        names::CACHE_EVICTIONS_TOTAL,
        "Total number of keys evicted by cache maintenance"
    );

    describe_counter!(
        names::CLUSTER_OPERATIONS_TOTAL,
        "Total number of distributed cache operations"
    );
    describe_histogram!(
        names::CLUSTER_OPERATION_DURATION,
        metrics::Unit::Seconds,
        "Distributed cache operation latency in seconds"
    );
}
