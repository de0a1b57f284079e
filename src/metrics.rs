//! Metrics for the distribution core.
//!
//! Plain atomic counters and gauges; a [`DistributionMetrics`] registry is
//! shared by the bucket table, transfer coordinator and lock registry, and
//! can be snapshotted for export.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    /// Create a new gauge at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Increment the gauge by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the gauge by 1.
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Set the gauge to a specific value.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics registry for the distribution core.
#[derive(Debug, Default)]
pub struct DistributionMetrics {
    /// Bucket moves started.
    pub transfers_started: Counter,
    /// Bucket moves completed successfully.
    pub transfers_completed: Counter,
    /// Bucket moves that exhausted their retry budget.
    pub transfers_failed: Counter,
    /// Individual retry attempts across all moves.
    pub transfers_retried: Counter,
    /// Buckets currently mid-transfer.
    pub buckets_in_transfer: Gauge,
    /// Distribution maps installed into the bucket table.
    pub map_installs: Counter,
    /// Stale maps rejected by the bucket table.
    pub stale_maps_rejected: Counter,
    /// Locks granted.
    pub locks_acquired: Counter,
    /// Lock attempts rejected because the key was held.
    pub lock_contentions: Counter,
}

impl DistributionMetrics {
    /// Create a fresh registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a point-in-time snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_started: self.transfers_started.get(),
            transfers_completed: self.transfers_completed.get(),
            transfers_failed: self.transfers_failed.get(),
            transfers_retried: self.transfers_retried.get(),
            buckets_in_transfer: self.buckets_in_transfer.get(),
            map_installs: self.map_installs.get(),
            stale_maps_rejected: self.stale_maps_rejected.get(),
            locks_acquired: self.locks_acquired.get(),
            lock_contentions: self.lock_contentions.get(),
        }
    }
}

/// Point-in-time view of [`DistributionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers_started: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub transfers_retried: u64,
    pub buckets_in_transfer: i64,
    pub map_installs: u64,
    pub stale_maps_rejected: u64,
    pub locks_acquired: u64,
    pub lock_contentions: u64,
}
