// src/metrics.rs
//! Metrics sink: a thin counter/gauge surface, external collaborator per spec.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::tier::Tier;

/// Gauge/counter surface consumed by the cache core.
///
/// Names mirror spec.md §6's metrics table. Increments and decrements are
/// paired on every exit path by callers; the sink itself is not responsible
/// for that pairing.
pub trait MetricsSink: Send + Sync {
    /// Absolute update of a tier's file count and total byte size, issued
    /// once per janitor pass over that tier.
    fn set_tier_totals(&self, tier: Tier, files: u64, bytes: u64);

    fn tier_file_removed(&self, tier: Tier, bytes: u64);

    /// Accounts for a single file newly materialized in `tier` (peer fetch
    /// landing in its destination tier). Janitor passes re-derive totals
    /// from scratch via `set_tier_totals`, so this only keeps gauges
    /// accurate between passes.
    fn tier_file_added(&self, tier: Tier, bytes: u64);

    fn downloading_inc(&self);
    fn downloading_dec(&self);

    fn waiting_inc(&self);
    fn waiting_dec(&self);

    /// Records the size of a file served via `OpenLocal`.
    fn size_served(&self, bytes: u64);
}

/// A sink that discards everything; useful for tests and degenerate builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn set_tier_totals(&self, _tier: Tier, _files: u64, _bytes: u64) {}
    fn tier_file_removed(&self, _tier: Tier, _bytes: u64) {}
    fn tier_file_added(&self, _tier: Tier, _bytes: u64) {}
    fn downloading_inc(&self) {}
    fn downloading_dec(&self) {}
    fn waiting_inc(&self) {}
    fn waiting_dec(&self) {}
    fn size_served(&self, _bytes: u64) {}
}

/// An in-process sink backed by atomics, queryable for tests and `/healthz`.
#[derive(Debug, Default)]
pub struct AtomicMetricsSink {
    hot_files: AtomicU64,
    hot_bytes: AtomicU64,
    cold_files: AtomicU64,
    cold_bytes: AtomicU64,
    downloading: AtomicI64,
    waiting: AtomicI64,
    bytes_served: AtomicU64,
}

impl AtomicMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downloading(&self) -> i64 {
        self.downloading.load(Ordering::Relaxed)
    }

    pub fn waiting(&self) -> i64 {
        self.waiting.load(Ordering::Relaxed)
    }

    pub fn tier_totals(&self, tier: Tier) -> (u64, u64) {
        match tier {
            Tier::Hot => (
                self.hot_files.load(Ordering::Relaxed),
                self.hot_bytes.load(Ordering::Relaxed),
            ),
            Tier::Cold => (
                self.cold_files.load(Ordering::Relaxed),
                self.cold_bytes.load(Ordering::Relaxed),
            ),
        }
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::Relaxed)
    }
}

impl MetricsSink for AtomicMetricsSink {
    fn set_tier_totals(&self, tier: Tier, files: u64, bytes: u64) {
        let (f, b) = match tier {
            Tier::Hot => (&self.hot_files, &self.hot_bytes),
            Tier::Cold => (&self.cold_files, &self.cold_bytes),
        };
        f.store(files, Ordering::Relaxed);
        b.store(bytes, Ordering::Relaxed);
    }

    fn tier_file_removed(&self, tier: Tier, bytes: u64) {
        let (f, b) = match tier {
            Tier::Hot => (&self.hot_files, &self.hot_bytes),
            Tier::Cold => (&self.cold_files, &self.cold_bytes),
        };
        f.fetch_sub(1, Ordering::Relaxed);
        b.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn tier_file_added(&self, tier: Tier, bytes: u64) {
        let (f, b) = match tier {
            Tier::Hot => (&self.hot_files, &self.hot_bytes),
            Tier::Cold => (&self.cold_files, &self.cold_bytes),
        };
        f.fetch_add(1, Ordering::Relaxed);
        b.fetch_add(bytes, Ordering::Relaxed);
    }

    fn downloading_inc(&self) {
        self.downloading.fetch_add(1, Ordering::Relaxed);
    }

    fn downloading_dec(&self) {
        self.downloading.fetch_sub(1, Ordering::Relaxed);
    }

    fn waiting_inc(&self) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    fn waiting_dec(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }

    fn size_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }
}
