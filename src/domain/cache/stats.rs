//! Cache usage counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide cache counters, safe to bump from concurrent requests
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        StatsSnapshot {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            memory: None,
            entries: None,
        }
    }
}

/// Counters plus what the backing store reports about itself
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    /// Hits as a percentage of reads, two decimals, 0 before any read
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    /// Bytes held by the store, when it can tell
    pub memory: Option<u64>,
    /// Entries held by the store, when it can tell
    pub entries: Option<usize>,
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;

    if total == 0 {
        return 0.0;
    }

    let rate = hits as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}
