//! Cache statistics.
//!
//! Counters are atomics so a shared service can update them from any task.
//! Each increment is mirrored to the `metrics` facade under a `tier` label.

use crate::metrics::names;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one cache tier.
#[derive(Debug)]
pub struct CacheStats {
    tier: &'static str,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    cluster_operations: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing or failed.
    pub misses: u64,
    /// Successful writes.
    pub sets: u64,
    /// Keys removed.
    pub deletes: u64,
    /// Absorbed backend or decode failures.
    pub errors: u64,
    /// Operations routed through the distributed coordinator.
    pub cluster_operations: u64,
    /// hits / (hits + misses), 0.0 before any read.
    pub hit_rate: f64,
}

impl CacheStats {
    /// Creates zeroed counters labelled with `tier` (e.g. `"single"`, `"cluster"`).
    #[must_use]
    pub const fn new(tier: &'static str) -> Self {
        Self {
            tier,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cluster_operations: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_HITS_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_MISSES_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_SETS_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_deletes(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.deletes.fetch_add(count, Ordering::Relaxed);
        counter!(names::CACHE_DELETES_TOTAL, "tier" => self.tier).increment(count);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_ERRORS_TOTAL, "tier" => self.tier).increment(1);
    }

    pub fn record_cluster_operation(&self, op: &'static str) {
        self.cluster_operations.fetch_add(1, Ordering::Relaxed);
        counter!(names::CLUSTER_OPERATIONS_TOTAL, "op" => op).increment(1);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStatsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cluster_operations: self.cluster_operations.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.errors,
            &self.cluster_operations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
