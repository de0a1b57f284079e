//! Bucket-based data distribution core for a partitioned cache.
//!
//! This crate implements the data-distribution subsystem of a partitioned
//! cache: a fixed key space of logical buckets, each owned by a node, with
//! support for live redistribution, replica-based state transfer and
//! lock-protected per-key access. It uses:
//! - **Per-bucket latches** so transfers on unrelated buckets never contend
//! - **Copy-on-write distribution maps** with monotonic view ids for
//!   stale-routing detection
//! - **Bounded-concurrency state transfer** with retries and a watchdog
//!
//! The wire protocol, network transport and cluster membership are external
//! collaborators, consumed through the [`transfer::BucketTransport`] /
//! [`transfer::BucketDataSource`] traits and the map codec in
//! [`distribution`].
//!
//! # Example
//!
//! ```rust,no_run
//! use partmap::{
//!     BucketTable, DistributionConfig, DistributionMap, DistributionPlanner, TransferPlan,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DistributionConfig::new(1000);
//! let seed: partmap::NodeAddress = "10.0.0.1:9000".parse()?;
//!
//! // Bootstrap: one node owns every bucket.
//! let table = Arc::new(BucketTable::new(&config, seed));
//! let map = DistributionMap::bootstrap(seed, config.bucket_count);
//!
//! // A second node joins; plan the redistribution.
//! let planner = DistributionPlanner::new(config.clone());
//! let joined = planner.compute_join(&map, "10.0.0.2:9000".parse()?)?;
//! let plan = TransferPlan::between(&map, &joined);
//! println!("{} buckets to move", plan.len());
//!
//! // Route a key while the transfer runs.
//! let bucket = table.resolve(b"user:123");
//! let owner = table.owner_of(bucket)?;
//! println!("bucket {bucket} served by {owner}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Command layer (external)           │
//! └─────────────────────────────────────────────────┘
//!           │ resolve/owner_of/wait_for_status
//!           ▼
//! ┌──────────────┐   installs    ┌──────────────────┐
//! │  BucketTable │◄──────────────│ DistributionMap  │
//! │ (per-bucket  │               │ (copy-on-write,  │
//! │  latches)    │               │  view ids)       │
//! └──────────────┘               └──────────────────┘
//!        ▲                               ▲
//!        │ stage/complete/abort          │ compute_*
//! ┌──────┴───────────────┐      ┌────────┴───────────┐
//! │ StateTransfer        │      │ DistributionPlanner│
//! │ Coordinator          │      └────────────────────┘
//! └──────────────────────┘
//!        │ send_bucket_payload / drain_bucket
//!        ▼
//! ┌─────────────────────────────────────────────────┐
//! │        Transport + storage (external)           │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency model
//!
//! - Exactly one node serves a bucket at any time: the temporary owner
//!   routes requests during transfer, the permanent owner otherwise.
//! - Writes to a bucket under transfer are rejected and redirected; the
//!   client retries against the owner once the bucket is functional.
//! - View ids increase monotonically; stale maps are rejected on install.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod distribution;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod transfer;
pub mod types;

// Re-export main types for convenience
pub use bucket::{Bucket, BucketStatus, BucketTable, StatusMask};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DistributionConfig;
pub use distribution::{
    deserialize_distribution_map, serialize_distribution_map, BucketMove, DistributionMap,
    DistributionPlanner, ReplicaIndex, TransferPlan,
};
pub use error::{CodecError, Error, LockError, PlanError, Result, TransferError};
pub use locks::{LockAccessType, LockEntry, LockRegistry, LockToken};
pub use metrics::{DistributionMetrics, MetricsSnapshot};
pub use transfer::{
    BucketDataSource, BucketTransport, MoveState, StateTransferCoordinator, TransferBatch,
    TransferEntry, TransferSummary,
};
pub use types::{BucketId, NodeAddress, ViewId};
