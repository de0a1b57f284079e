//! Error types for the distribution core.

use crate::types::{BucketId, NodeAddress, ViewId};
use thiserror::Error;

/// Result type alias for distribution operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the distribution core.
#[derive(Error, Debug)]
pub enum Error {
    /// Bucket id out of range. A programming or configuration error, never
    /// retried.
    #[error("unknown bucket: {0}")]
    UnknownBucket(BucketId),

    /// A wait exceeded its deadline. The caller decides whether to retry or
    /// fail the client request.
    #[error("operation timed out")]
    Timeout,

    /// A distribution map older than the one already installed was received.
    /// The client is expected to refresh its map and retry.
    #[error("stale distribution map: received view {received}, current view {current}")]
    StaleView { current: ViewId, received: ViewId },

    /// Planner input validation failures.
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// State transfer failures.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Per-key lock failures.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Distribution map encoding/decoding failures.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
}

/// Planner input validation errors. Rejected before any state mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    /// A manual move was requested with no destination nodes.
    #[error("no destination nodes for manual move")]
    InsufficientNodes,

    /// Percentage outside `(0, 100]`.
    #[error("invalid percent: {0}, must be in (0, 100]")]
    InvalidPercent(f32),

    /// The joining node already owns buckets in the current map.
    #[error("node already present in map: {0}")]
    NodeAlreadyPresent(NodeAddress),

    /// The source node owns no buckets in the current map.
    #[error("unknown source node: {0}")]
    UnknownSourceNode(NodeAddress),

    /// The activity would leave the cluster without any owner.
    #[error("no nodes would remain in the cluster")]
    EmptyCluster,

    /// No node deviates from the average by more than the configured
    /// threshold.
    #[error("balance not required")]
    BalanceNotRequired,
}

/// State transfer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    /// The transfer was aborted before completion.
    #[error("transfer aborted: {0}")]
    Aborted(String),

    /// The peer node could not be reached.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(NodeAddress),

    /// The bucket already has a transfer in flight.
    #[error("bucket {0} already in transfer")]
    AlreadyInTransfer(BucketId),

    /// The retry budget for a bucket move was exhausted.
    #[error("retries exhausted for bucket {bucket}: {attempts} attempts")]
    RetriesExhausted { bucket: BucketId, attempts: u32 },
}

/// Per-key lock errors. Always surfaced to the immediate caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    /// An unexpired lock with a different id holds the key.
    #[error("key already locked: {key}")]
    AlreadyLocked { key: String },

    /// Unlock presented an id that does not match the active lock.
    #[error("lock id mismatch for key: {key}")]
    LockMismatch { key: String },
}

/// Distribution map encoding/decoding errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Frame does not start with the expected magic bytes.
    #[error("bad magic number")]
    BadMagic,

    /// Frame carries a format version this build cannot read.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Frame shorter than its header or declared payload.
    #[error("truncated frame")]
    Truncated,

    /// Payload checksum does not match the trailer.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Serialization(e.to_string())
    }
}
