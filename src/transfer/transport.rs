//! Boundary traits implemented by the network and storage layers.

use crate::distribution::DistributionMap;
use crate::error::TransferError;
use crate::transfer::payload::TransferBatch;
use crate::types::{BucketId, NodeAddress};
use std::fmt;

/// Ships bucket payloads and map updates to peer nodes.
///
/// Implemented by the connection-management layer; the coordinator only
/// decides what to send where.
#[async_trait::async_trait]
pub trait BucketTransport: Send + Sync + fmt::Debug {
    /// Deliver one batch of a bucket's contents to the receiving node.
    async fn send_bucket_payload(
        &self,
        to: NodeAddress,
        batch: TransferBatch,
    ) -> Result<(), TransferError>;

    /// Fan a distribution map out to all known cluster members.
    /// Fire-and-forget: delivery failures are the transport's problem.
    async fn broadcast_map_update(&self, map: &DistributionMap) -> Result<(), TransferError>;
}

/// Supplies the local contents of a bucket in batches.
///
/// Implemented by the storage layer. `last_key` is the resume cursor: `None`
/// starts from the beginning, otherwise iteration continues strictly after
/// the given key.
#[async_trait::async_trait]
pub trait BucketDataSource: Send + Sync + fmt::Debug {
    /// Read the next batch of at most `batch_size` entries from a bucket.
    async fn drain_bucket(
        &self,
        bucket_id: BucketId,
        last_key: Option<Vec<u8>>,
        batch_size: usize,
    ) -> Result<TransferBatch, TransferError>;
}
