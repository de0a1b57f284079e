//! The bucket-to-owner assignment snapshot.

use crate::error::{Error, Result};
use crate::types::{BucketId, NodeAddress, ViewId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// An immutable-per-version snapshot of bucket ownership.
///
/// Every membership or distribution change produces a new map with a view id
/// one higher than its input; peers reject maps older than the view they
/// already applied. Ordered collections keep iteration (and thus planner
/// output) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionMap {
    view_id: ViewId,
    /// Complete assignment: every bucket id has exactly one entry.
    bucket_to_owner: BTreeMap<BucketId, NodeAddress>,
    /// Override entries used only when the normal owner cannot serve, e.g.
    /// a replica promoted because its primary left.
    special_owners: BTreeMap<BucketId, NodeAddress>,
    /// Buckets with no reachable owner. Empty in a healthy stable map.
    orphaned_buckets: BTreeSet<BucketId>,
    /// Set when the map was computed in response to a node-leave event.
    leaving_node: Option<NodeAddress>,
}

impl DistributionMap {
    /// The single-node bootstrap map: every bucket owned by `first_node`.
    pub fn bootstrap(first_node: NodeAddress, bucket_count: u32) -> Self {
        Self {
            view_id: 1,
            bucket_to_owner: (0..bucket_count).map(|id| (id, first_node)).collect(),
            special_owners: BTreeMap::new(),
            orphaned_buckets: BTreeSet::new(),
            leaving_node: None,
        }
    }

    /// The map's view id.
    pub fn view_id(&self) -> ViewId {
        self.view_id
    }

    /// Number of buckets in the assignment.
    pub fn bucket_count(&self) -> u32 {
        self.bucket_to_owner.len() as u32
    }

    /// The node set owning at least one bucket.
    pub fn owners(&self) -> BTreeSet<NodeAddress> {
        self.bucket_to_owner.values().copied().collect()
    }

    /// The node assigned to a bucket, with special-owner overrides applied.
    pub fn owner_of(&self, bucket_id: BucketId) -> Option<NodeAddress> {
        self.special_owners
            .get(&bucket_id)
            .or_else(|| self.bucket_to_owner.get(&bucket_id))
            .copied()
    }

    /// Whether a bucket is served through a special-owner override.
    pub fn is_special(&self, bucket_id: BucketId) -> bool {
        self.special_owners.contains_key(&bucket_id)
    }

    /// Whether a bucket has no reachable owner.
    pub fn is_orphaned(&self, bucket_id: BucketId) -> bool {
        self.orphaned_buckets.contains(&bucket_id)
    }

    /// The node whose departure produced this map, if any.
    pub fn leaving_node(&self) -> Option<NodeAddress> {
        self.leaving_node
    }

    /// Buckets with no reachable owner, ascending.
    pub fn orphaned_buckets(&self) -> impl Iterator<Item = BucketId> + '_ {
        self.orphaned_buckets.iter().copied()
    }

    /// Special-owner overrides, ascending by bucket id.
    pub fn special_owners(&self) -> impl Iterator<Item = (BucketId, NodeAddress)> + '_ {
        self.special_owners.iter().map(|(id, owner)| (*id, *owner))
    }

    /// The full assignment, ascending by bucket id, without overrides.
    pub fn assignments(&self) -> impl Iterator<Item = (BucketId, NodeAddress)> + '_ {
        self.bucket_to_owner.iter().map(|(id, owner)| (*id, *owner))
    }

    /// Bucket ids assigned to `node` (override-aware), ascending.
    pub fn buckets_owned_by(&self, node: NodeAddress) -> Vec<BucketId> {
        self.bucket_to_owner
            .keys()
            .copied()
            .filter(|&id| self.owner_of(id) == Some(node))
            .collect()
    }

    /// Bucket count per owner (override-aware).
    pub fn owner_counts(&self) -> BTreeMap<NodeAddress, usize> {
        let mut counts = BTreeMap::new();
        for &id in self.bucket_to_owner.keys() {
            let owner = self.owner_of(id).expect("key came from the map");
            *counts.entry(owner).or_insert(0) += 1;
        }
        counts
    }

    /// A healthy stable map has no orphaned buckets.
    pub fn is_healthy(&self) -> bool {
        self.orphaned_buckets.is_empty()
    }

    /// Check partition totality: bucket ids `0..bucket_count`, each exactly
    /// once.
    pub fn validate(&self, bucket_count: u32) -> Result<()> {
        if self.bucket_to_owner.len() as u32 != bucket_count {
            return Err(Error::Config(format!(
                "map covers {} buckets, expected {}",
                self.bucket_to_owner.len(),
                bucket_count
            )));
        }
        // Keys are unique by construction; a bounded max with a full count
        // means every id in range appears exactly once.
        if let Some(max) = self.bucket_to_owner.keys().next_back() {
            if *max >= bucket_count {
                return Err(Error::Config(format!(
                    "map contains out-of-range bucket id {max}"
                )));
            }
        }
        for id in &self.orphaned_buckets {
            if !self.bucket_to_owner.contains_key(id) {
                return Err(Error::Config(format!(
                    "orphaned bucket {id} missing from assignment"
                )));
            }
        }
        Ok(())
    }

    /// Reassign a bucket to a new owner. Used by the planner while deriving
    /// a successor map.
    pub(crate) fn assign(&mut self, bucket_id: BucketId, owner: NodeAddress) {
        self.bucket_to_owner.insert(bucket_id, owner);
        self.special_owners.remove(&bucket_id);
        self.orphaned_buckets.remove(&bucket_id);
    }

    /// Reassign a bucket through a special-owner override (replica
    /// promotion: the new owner already holds the data).
    pub(crate) fn assign_special(&mut self, bucket_id: BucketId, owner: NodeAddress) {
        self.bucket_to_owner.insert(bucket_id, owner);
        self.special_owners.insert(bucket_id, owner);
        self.orphaned_buckets.remove(&bucket_id);
    }

    /// Mark a bucket as having no reachable owner.
    pub(crate) fn mark_orphaned(&mut self, bucket_id: BucketId) {
        self.special_owners.remove(&bucket_id);
        self.orphaned_buckets.insert(bucket_id);
    }

    pub(crate) fn set_leaving_node(&mut self, node: Option<NodeAddress>) {
        self.leaving_node = node;
    }

    pub(crate) fn clear_overrides(&mut self) {
        self.special_owners.clear();
        self.leaving_node = None;
    }

    /// Return the map with its view id replaced. Peers installing a received
    /// map use the wire view id verbatim; the planner bumps it by one.
    pub fn with_view(mut self, view_id: ViewId) -> Self {
        self.view_id = view_id;
        self
    }

    pub(crate) fn bump_view(&mut self) {
        self.view_id += 1;
    }
}

/// Which nodes hold a replica of each bucket, supplied by the external view
/// provider when planning a node departure.
#[derive(Debug, Clone, Default)]
pub struct ReplicaIndex {
    holders: HashMap<BucketId, Vec<NodeAddress>>,
}

impl ReplicaIndex {
    /// An index with no replicas recorded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record a node holding a replica of a bucket.
    pub fn record(&mut self, bucket_id: BucketId, holder: NodeAddress) {
        let holders = self.holders.entry(bucket_id).or_default();
        if !holders.contains(&holder) {
            holders.push(holder);
            holders.sort();
        }
    }

    /// A replica holder for the bucket other than `excluding`, if any.
    /// Holders are consulted in address order so the choice is
    /// deterministic.
    pub fn holder_for(&self, bucket_id: BucketId, excluding: NodeAddress) -> Option<NodeAddress> {
        self.holders
            .get(&bucket_id)?
            .iter()
            .copied()
            .find(|&h| h != excluding)
    }
}
