//! Fixed-size table of buckets with stable key resolution and async waiting.

use crate::bucket::{Bucket, BucketStatus, StatusMask};
use crate::config::DistributionConfig;
use crate::distribution::DistributionMap;
use crate::error::{Error, Result, TransferError};
use crate::metrics::DistributionMetrics;
use crate::types::{BucketId, NodeAddress, ViewId};
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

struct SlotState {
    permanent_owner: NodeAddress,
    temp_owner: NodeAddress,
    status: BucketStatus,
}

/// One bucket's shared state: ownership fields behind a per-bucket lock and
/// a notifier for waiters. No global bucket lock exists, so transfers on
/// unrelated buckets never serialize against each other.
struct Slot {
    state: RwLock<SlotState>,
    changed: Notify,
}

impl Slot {
    fn new(owner: NodeAddress) -> Self {
        Self {
            state: RwLock::new(SlotState {
                permanent_owner: owner,
                temp_owner: owner,
                status: BucketStatus::Functional,
            }),
            changed: Notify::new(),
        }
    }
}

/// Fixed-size map of buckets indexed by bucket id.
///
/// Keys resolve to bucket ids through a stable hash, so every node computes
/// identical bucket ids for a key. Ownership and status fields mutate in
/// place under per-bucket synchronization; new distribution maps are applied
/// with [`BucketTable::install_map`].
pub struct BucketTable {
    slots: Vec<Slot>,
    view: AtomicU64,
    metrics: Arc<DistributionMetrics>,
}

impl BucketTable {
    /// Create a table with every bucket functional under `initial_owner`,
    /// the single-node bootstrap state. The installed view starts at 0.
    pub fn new(config: &DistributionConfig, initial_owner: NodeAddress) -> Self {
        Self::with_metrics(config, initial_owner, Arc::new(DistributionMetrics::new()))
    }

    /// Create a table sharing an existing metrics registry.
    pub fn with_metrics(
        config: &DistributionConfig,
        initial_owner: NodeAddress,
        metrics: Arc<DistributionMetrics>,
    ) -> Self {
        let slots = (0..config.bucket_count)
            .map(|_| Slot::new(initial_owner))
            .collect();
        Self {
            slots,
            view: AtomicU64::new(0),
            metrics,
        }
    }

    /// Total number of buckets.
    pub fn bucket_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// The view id of the most recently installed distribution map.
    pub fn installed_view(&self) -> ViewId {
        self.view.load(Ordering::SeqCst)
    }

    /// Resolve a key to its bucket id.
    ///
    /// Deterministic across processes and table instances with the same
    /// bucket count: XxHash64 with a fixed seed, modulo the bucket count.
    pub fn resolve(&self, key: &[u8]) -> BucketId {
        let mut hasher = XxHash64::with_seed(0);
        key.hash(&mut hasher);
        (hasher.finish() % self.slots.len() as u64) as BucketId
    }

    fn slot(&self, bucket_id: BucketId) -> Result<&Slot> {
        self.slots
            .get(bucket_id as usize)
            .ok_or(Error::UnknownBucket(bucket_id))
    }

    /// The node currently serving a bucket: the temporary owner while a
    /// hand-off is pending, the permanent owner otherwise.
    pub fn owner_of(&self, bucket_id: BucketId) -> Result<NodeAddress> {
        Ok(self.slot(bucket_id)?.state.read().temp_owner)
    }

    /// Current status of a bucket.
    pub fn status_of(&self, bucket_id: BucketId) -> Result<BucketStatus> {
        Ok(self.slot(bucket_id)?.state.read().status)
    }

    /// Whether a bucket is currently functional.
    pub fn is_functional(&self, bucket_id: BucketId) -> Result<bool> {
        Ok(self.status_of(bucket_id)? == BucketStatus::Functional)
    }

    /// Point-in-time view of a single bucket.
    pub fn bucket(&self, bucket_id: BucketId) -> Result<Bucket> {
        let slot = self.slot(bucket_id)?;
        let state = slot.state.read();
        Ok(Bucket {
            id: bucket_id,
            permanent_owner: state.permanent_owner,
            temp_owner: state.temp_owner,
            status: state.status,
        })
    }

    /// Point-in-time view of every bucket.
    pub fn snapshot(&self) -> Vec<Bucket> {
        (0..self.slots.len() as u32)
            .map(|id| self.bucket(id).expect("id in range"))
            .collect()
    }

    /// Set a bucket's status, waking any waiters.
    ///
    /// Setting the status already held is a no-op, not an error.
    pub fn set_status(&self, bucket_id: BucketId, new_status: BucketStatus) -> Result<()> {
        let slot = self.slot(bucket_id)?;
        {
            let mut state = slot.state.write();
            if state.status == new_status {
                return Ok(());
            }
            debug!(bucket_id, from = %state.status, to = %new_status, "Bucket status change");
            state.status = new_status;
        }
        slot.changed.notify_waiters();
        Ok(())
    }

    /// Stage a hand-off: the bucket's temporary owner becomes `to` and its
    /// status becomes [`BucketStatus::NeedTransfer`].
    ///
    /// Staging a bucket that already has a different hand-off pending fails
    /// with [`TransferError::AlreadyInTransfer`]; re-staging the same target
    /// is a no-op.
    pub fn begin_transfer(&self, bucket_id: BucketId, to: NodeAddress) -> Result<()> {
        let slot = self.slot(bucket_id)?;
        {
            let mut state = slot.state.write();
            if state.temp_owner == to {
                return Ok(());
            }
            if state.temp_owner != state.permanent_owner {
                return Err(TransferError::AlreadyInTransfer(bucket_id).into());
            }
            if state.permanent_owner == to {
                // Degenerate move onto the current owner.
                return Ok(());
            }
            state.temp_owner = to;
            state.status = BucketStatus::NeedTransfer;
        }
        slot.changed.notify_waiters();
        Ok(())
    }

    /// Mark a staged bucket as actively copying.
    pub fn mark_under_transfer(&self, bucket_id: BucketId) -> Result<()> {
        let slot = self.slot(bucket_id)?;
        {
            let mut state = slot.state.write();
            match state.status {
                BucketStatus::UnderTransfer => return Ok(()),
                BucketStatus::NeedTransfer => state.status = BucketStatus::UnderTransfer,
                BucketStatus::Functional => {
                    return Err(TransferError::Aborted(format!(
                        "bucket {bucket_id} is not staged for transfer"
                    ))
                    .into())
                }
            }
        }
        slot.changed.notify_waiters();
        Ok(())
    }

    /// Complete a hand-off: the temporary owner becomes permanent and the
    /// bucket returns to [`BucketStatus::Functional`]. Waiters are woken.
    pub fn complete_transfer(&self, bucket_id: BucketId) -> Result<()> {
        let slot = self.slot(bucket_id)?;
        {
            let mut state = slot.state.write();
            state.permanent_owner = state.temp_owner;
            state.status = BucketStatus::Functional;
        }
        slot.changed.notify_waiters();
        Ok(())
    }

    /// Abort a hand-off: the temporary owner reverts to the permanent owner
    /// and the bucket returns to [`BucketStatus::Functional`]. Waiters are
    /// woken.
    pub fn abort_transfer(&self, bucket_id: BucketId) -> Result<()> {
        let slot = self.slot(bucket_id)?;
        {
            let mut state = slot.state.write();
            state.temp_owner = state.permanent_owner;
            state.status = BucketStatus::Functional;
        }
        slot.changed.notify_waiters();
        Ok(())
    }

    /// Block until the bucket's status matches `mask`, or its temporary
    /// owner no longer equals `owner_snapshot` (ownership already moved on),
    /// or `timeout` elapses.
    ///
    /// Waiting is a pure read-side operation: timeout or cancellation leaves
    /// the bucket untouched.
    pub async fn wait_for_status(
        &self,
        bucket_id: BucketId,
        owner_snapshot: NodeAddress,
        mask: StatusMask,
        timeout: Duration,
    ) -> Result<()> {
        let slot = self.slot(bucket_id)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // The notified future must be armed before checking the
            // condition; a wake between the check and the await would
            // otherwise be lost.
            let mut notified = pin!(slot.changed.notified());
            notified.as_mut().enable();
            {
                let state = slot.state.read();
                if state.temp_owner != owner_snapshot || mask.contains(state.status) {
                    return Ok(());
                }
            }
            tokio::time::timeout_at(deadline, notified)
                .await
                .map_err(|_| Error::Timeout)?;
        }
    }

    /// Wait for a bucket to become functional, taking the current serving
    /// owner as the snapshot.
    pub async fn wait_for_functional(&self, bucket_id: BucketId, timeout: Duration) -> Result<()> {
        let snapshot = self.owner_of(bucket_id)?;
        self.wait_for_status(bucket_id, snapshot, StatusMask::FUNCTIONAL, timeout)
            .await
    }

    /// Ids of buckets this node serves or owns.
    pub fn buckets_owned_by(&self, node: NodeAddress) -> Vec<BucketId> {
        let mut buckets = Vec::new();
        for (id, slot) in self.slots.iter().enumerate() {
            let state = slot.state.read();
            if state.temp_owner == node || state.permanent_owner == node {
                buckets.push(id as BucketId);
            }
        }
        buckets
    }

    /// Whether any bucket is mid-transfer.
    pub fn in_state_transfer(&self) -> bool {
        self.slots.iter().any(|slot| {
            let state = slot.state.read();
            state.status != BucketStatus::Functional
        })
    }

    /// Apply a newer distribution map to the live table.
    ///
    /// Buckets whose assigned owner differs from the current permanent owner
    /// are staged for transfer (temporary owner set, `NeedTransfer`); buckets
    /// assigned back to their permanent owner have any pending hand-off
    /// reverted. Special-owner entries are replica promotions: the new owner
    /// already holds the data, so ownership flips immediately with no
    /// transfer. Orphaned buckets whose recorded owner is unreachable revert
    /// to their permanent owner when the data never left it, and stay put
    /// otherwise.
    ///
    /// Maps older than the installed view are rejected with
    /// [`Error::StaleView`]; re-delivery of the installed view is a no-op.
    pub fn install_map(&self, map: &DistributionMap) -> Result<()> {
        map.validate(self.bucket_count())
            .map_err(|e| Error::Config(format!("refusing invalid map: {e}")))?;

        let current = self.installed_view();
        if map.view_id() < current {
            self.metrics.stale_maps_rejected.inc();
            warn!(
                current,
                received = map.view_id(),
                "Rejecting stale distribution map"
            );
            return Err(Error::StaleView {
                current,
                received: map.view_id(),
            });
        }
        if map.view_id() == current {
            debug!(view_id = current, "Distribution map already installed");
            return Ok(());
        }

        for (id, slot) in self.slots.iter().enumerate() {
            let id = id as BucketId;
            let owner = map.owner_of(id).expect("validated map is total");
            let mut state = slot.state.write();

            if map.is_orphaned(id) {
                // The recorded owner is gone. If a hand-off to it never
                // completed the permanent owner still has the data.
                if state.permanent_owner != owner {
                    state.temp_owner = state.permanent_owner;
                    state.status = BucketStatus::Functional;
                }
                continue;
            }

            if map.is_special(id) {
                state.permanent_owner = owner;
                state.temp_owner = owner;
                state.status = BucketStatus::Functional;
            } else if owner != state.permanent_owner {
                state.temp_owner = owner;
                state.status = BucketStatus::NeedTransfer;
            } else {
                state.temp_owner = state.permanent_owner;
                state.status = BucketStatus::Functional;
            }
        }

        self.view.store(map.view_id(), Ordering::SeqCst);
        self.metrics.map_installs.inc();
        for slot in &self.slots {
            slot.changed.notify_waiters();
        }
        info!(view_id = map.view_id(), "Installed distribution map");
        Ok(())
    }
}

impl std::fmt::Debug for BucketTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketTable")
            .field("bucket_count", &self.bucket_count())
            .field("installed_view", &self.installed_view())
            .field("in_state_transfer", &self.in_state_transfer())
            .finish()
    }
}
