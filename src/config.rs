//! Configuration types for the distribution core.

use crate::error::{Error, Result};
use std::time::Duration;

/// Configuration for the distribution core.
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// Total number of logical buckets. Fixed for the cluster lifetime;
    /// every node must use the same value or keys resolve to different
    /// buckets on different nodes.
    pub bucket_count: u32,

    /// Maximum number of buckets transferring concurrently.
    pub max_concurrent_transfers: u32,

    /// Deadline for a single bucket-move attempt. A bucket is never left
    /// mid-transfer past this deadline; the move is reverted and retried.
    pub transfer_timeout: Duration,

    /// Retries per bucket move before the move is surfaced as failed.
    pub max_transfer_retries: u32,

    /// Maximum entries per transfer batch.
    pub transfer_batch_size: usize,

    /// Percentage above the per-node average at which automatic rebalancing
    /// considers a node overloaded.
    pub auto_balance_threshold: u32,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            bucket_count: 1000,
            max_concurrent_transfers: 4,
            transfer_timeout: Duration::from_secs(30),
            max_transfer_retries: 3,
            transfer_batch_size: 1000,
            auto_balance_threshold: 10,
        }
    }
}

impl DistributionConfig {
    /// Create a configuration with the given bucket count.
    pub fn new(bucket_count: u32) -> Self {
        Self {
            bucket_count,
            ..Default::default()
        }
    }

    /// Set the maximum number of concurrent bucket transfers.
    pub fn with_max_concurrent_transfers(mut self, max: u32) -> Self {
        self.max_concurrent_transfers = max;
        self
    }

    /// Set the per-attempt transfer deadline.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the retry budget per bucket move.
    pub fn with_max_transfer_retries(mut self, retries: u32) -> Self {
        self.max_transfer_retries = retries;
        self
    }

    /// Set the maximum entries per transfer batch.
    pub fn with_transfer_batch_size(mut self, size: usize) -> Self {
        self.transfer_batch_size = size;
        self
    }

    /// Set the automatic balancing threshold (percent above average).
    pub fn with_auto_balance_threshold(mut self, percent: u32) -> Self {
        self.auto_balance_threshold = percent;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(Error::Config("bucket_count must be non-zero".into()));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(Error::Config(
                "max_concurrent_transfers must be non-zero".into(),
            ));
        }
        if self.transfer_batch_size == 0 {
            return Err(Error::Config("transfer_batch_size must be non-zero".into()));
        }
        if self.auto_balance_threshold > 100 {
            return Err(Error::Config(
                "auto_balance_threshold must be at most 100".into(),
            ));
        }
        Ok(())
    }
}
