//! Payload types shipped between nodes during state transfer.

use crate::types::BucketId;
use serde::{Deserialize, Serialize};

/// A cache entry being transferred between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    /// The cache key.
    pub key: Vec<u8>,

    /// The cache value.
    pub value: Vec<u8>,

    /// Absolute expiration time in milliseconds since the Unix epoch.
    /// `None` means no expiration.
    pub expires_at_millis: Option<u64>,
}

impl TransferEntry {
    /// Create an entry without expiration.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at_millis: None,
        }
    }

    /// Create an entry with an absolute expiration timestamp.
    pub fn with_expiration(
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        expires_at_millis: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at_millis: Some(expires_at_millis),
        }
    }

    /// Whether the entry is expired at the given timestamp.
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        self.expires_at_millis
            .map_or(false, |expires| expires <= now_millis)
    }
}

/// A batch of entries from one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    /// Bucket the entries belong to.
    pub bucket_id: BucketId,

    /// Batch sequence number within the bucket, starting at 0.
    pub sequence: u64,

    /// Entries in this batch.
    pub entries: Vec<TransferEntry>,

    /// Whether this is the bucket's last batch.
    pub is_final: bool,
}

impl TransferBatch {
    /// Create a batch.
    pub fn new(bucket_id: BucketId, sequence: u64, entries: Vec<TransferEntry>, is_final: bool) -> Self {
        Self {
            bucket_id,
            sequence,
            entries,
            is_final,
        }
    }

    /// An empty final batch, for buckets with no remaining entries.
    pub fn empty_final(bucket_id: BucketId, sequence: u64) -> Self {
        Self {
            bucket_id,
            sequence,
            entries: Vec::new(),
            is_final: true,
        }
    }

    /// Number of entries in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last key in the batch, used as the resume cursor.
    pub fn last_key(&self) -> Option<&[u8]> {
        self.entries.last().map(|e| e.key.as_slice())
    }

    /// Drop entries already expired at the given timestamp.
    pub fn filter_expired_at(self, now_millis: u64) -> Self {
        Self {
            bucket_id: self.bucket_id,
            sequence: self.sequence,
            entries: self
                .entries
                .into_iter()
                .filter(|e| !e.is_expired_at(now_millis))
                .collect(),
            is_final: self.is_final,
        }
    }
}
