//! Computes successor distribution maps for topology and balance events.

use crate::config::DistributionConfig;
use crate::distribution::map::{DistributionMap, ReplicaIndex};
use crate::error::{PlanError, Result};
use crate::types::{BucketId, NodeAddress};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Plans bucket redistribution.
///
/// Every `compute_*` method is pure: inputs are never mutated and the result
/// is a fresh map with `view_id` one higher than its input. Input validation
/// happens before any work, so a rejected request has no partial effects.
/// Determinism rules: owners are ordered by address, donors by (bucket count
/// descending, address ascending), buckets always by ascending id.
#[derive(Debug, Clone)]
pub struct DistributionPlanner {
    config: DistributionConfig,
}

impl DistributionPlanner {
    /// Create a planner.
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    /// Redistribute a fair share of buckets to a joining node.
    ///
    /// Buckets move greedily from the most-loaded owners until the joiner is
    /// within one bucket of `bucket_count / node_count`. Orphaned buckets are
    /// adopted by the joiner first; their data is already lost and was
    /// surfaced when the orphaning map was computed.
    pub fn compute_join(
        &self,
        current: &DistributionMap,
        joining: NodeAddress,
    ) -> Result<DistributionMap> {
        current.validate(self.config.bucket_count)?;
        if current.owners().contains(&joining) {
            return Err(PlanError::NodeAlreadyPresent(joining).into());
        }

        let mut map = current.clone();
        map.clear_overrides();

        let orphans: Vec<BucketId> = map.orphaned_buckets().collect();
        for bucket in &orphans {
            map.assign(*bucket, joining);
        }

        let mut holdings = owner_holdings(&map);
        holdings.entry(joining).or_default();
        let node_count = holdings.len();
        let target = (self.config.bucket_count as usize) / node_count;

        while holdings[&joining].len() < target {
            let donor = match most_loaded_except(&holdings, joining) {
                Some(donor) => donor,
                None => break,
            };
            let bucket = holdings.get_mut(&donor).expect("donor exists").remove(0);
            map.assign(bucket, joining);
            holdings.get_mut(&joining).expect("joiner entry").push(bucket);
        }

        map.bump_view();
        info!(
            joining = %joining,
            view_id = map.view_id(),
            assigned = holdings[&joining].len(),
            adopted_orphans = orphans.len(),
            "Computed join map"
        );
        Ok(map)
    }

    /// Reassign a leaving node's buckets.
    ///
    /// Each bucket goes to a node holding a replica of it when one exists,
    /// recorded as a special owner (replica promotion, no data movement).
    /// Buckets with no replica holder are marked orphaned and kept in the
    /// assignment under the departed node; they are reported loudly, never
    /// silently reassigned.
    pub fn compute_leave(
        &self,
        current: &DistributionMap,
        leaving: NodeAddress,
        replicas: &ReplicaIndex,
    ) -> Result<DistributionMap> {
        current.validate(self.config.bucket_count)?;
        let owners = current.owners();
        if !owners.contains(&leaving) {
            return Err(PlanError::UnknownSourceNode(leaving).into());
        }
        if owners.len() == 1 {
            return Err(PlanError::EmptyCluster.into());
        }

        let mut map = current.clone();
        map.clear_overrides();
        map.set_leaving_node(Some(leaving));

        let mut promoted = 0usize;
        let mut orphaned = Vec::new();
        for bucket in current.buckets_owned_by(leaving) {
            match replicas.holder_for(bucket, leaving) {
                Some(holder) => {
                    map.assign_special(bucket, holder);
                    promoted += 1;
                }
                None => {
                    map.mark_orphaned(bucket);
                    orphaned.push(bucket);
                }
            }
        }

        map.bump_view();
        if orphaned.is_empty() {
            info!(
                leaving = %leaving,
                view_id = map.view_id(),
                promoted,
                "Computed leave map"
            );
        } else {
            warn!(
                leaving = %leaving,
                view_id = map.view_id(),
                promoted,
                orphaned = orphaned.len(),
                "Computed leave map with unrecoverable buckets; their data is lost"
            );
        }
        Ok(map)
    }

    /// Move approximately `percent` of the source's buckets, split evenly
    /// across the destinations in round-robin order, lowest bucket ids
    /// first.
    pub fn compute_manual(
        &self,
        current: &DistributionMap,
        source: NodeAddress,
        destinations: &[NodeAddress],
        percent: f32,
    ) -> Result<DistributionMap> {
        if destinations.is_empty() {
            return Err(PlanError::InsufficientNodes.into());
        }
        if !(percent > 0.0 && percent <= 100.0) {
            return Err(PlanError::InvalidPercent(percent).into());
        }
        current.validate(self.config.bucket_count)?;

        let owned = current.buckets_owned_by(source);
        if owned.is_empty() {
            return Err(PlanError::UnknownSourceNode(source).into());
        }

        let move_count = ((owned.len() as f32) * percent / 100.0).round() as usize;
        let move_count = move_count.min(owned.len());

        let mut map = current.clone();
        map.clear_overrides();
        for (i, bucket) in owned.iter().take(move_count).enumerate() {
            map.assign(*bucket, destinations[i % destinations.len()]);
        }

        map.bump_view();
        info!(
            source = %source,
            destinations = destinations.len(),
            percent,
            moved = move_count,
            view_id = map.view_id(),
            "Computed manual move map"
        );
        Ok(map)
    }

    /// Level bucket counts across the current owners.
    ///
    /// Fails with [`PlanError::BalanceNotRequired`] when no owner exceeds the
    /// per-node average by more than the configured threshold percentage, or
    /// when the map still carries orphaned buckets.
    pub fn compute_rebalance(&self, current: &DistributionMap) -> Result<DistributionMap> {
        current.validate(self.config.bucket_count)?;
        if !current.is_healthy() {
            // Orphaned buckets have no live owner to move data from; a join
            // must adopt them before counts can be leveled.
            warn!("Refusing to rebalance a map with orphaned buckets");
            return Err(PlanError::BalanceNotRequired.into());
        }
        let counts = current.owner_counts();
        if counts.is_empty() {
            return Err(PlanError::EmptyCluster.into());
        }
        if counts.len() == 1 {
            return Err(PlanError::BalanceNotRequired.into());
        }

        let total = self.config.bucket_count as usize;
        let avg = total as f64 / counts.len() as f64;
        let max = *counts.values().max().expect("non-empty");
        let percent_above = ((max as f64 - avg) / avg) * 100.0;
        if percent_above <= self.config.auto_balance_threshold as f64 {
            return Err(PlanError::BalanceNotRequired.into());
        }

        // Per-owner targets: total/n each, remainder to the lowest
        // addresses.
        let base = total / counts.len();
        let extra = total % counts.len();
        let targets: BTreeMap<NodeAddress, usize> = counts
            .keys()
            .enumerate()
            .map(|(i, &node)| (node, if i < extra { base + 1 } else { base }))
            .collect();

        let mut map = current.clone();
        map.clear_overrides();
        let mut holdings = owner_holdings(&map);

        loop {
            let donor = holdings
                .iter()
                .filter(|(node, buckets)| buckets.len() > targets[*node])
                .map(|(node, buckets)| (buckets.len() - targets[node], Reverse(*node)))
                .max()
                .map(|(_, Reverse(node))| node);
            let receiver = holdings
                .iter()
                .filter(|(node, buckets)| buckets.len() < targets[*node])
                .map(|(node, buckets)| (targets[node] - buckets.len(), Reverse(*node)))
                .max()
                .map(|(_, Reverse(node))| node);

            let (donor, receiver) = match (donor, receiver) {
                (Some(d), Some(r)) => (d, r),
                _ => break,
            };

            let bucket = holdings.get_mut(&donor).expect("donor exists").remove(0);
            map.assign(bucket, receiver);
            holdings
                .get_mut(&receiver)
                .expect("receiver exists")
                .push(bucket);
        }

        map.bump_view();
        info!(view_id = map.view_id(), "Computed rebalance map");
        Ok(map)
    }
}

/// Owner -> ascending bucket-id list for a map.
fn owner_holdings(map: &DistributionMap) -> BTreeMap<NodeAddress, Vec<BucketId>> {
    let mut holdings: BTreeMap<NodeAddress, Vec<BucketId>> = BTreeMap::new();
    for (bucket, _) in map.assignments() {
        let owner = map.owner_of(bucket).expect("id came from the map");
        holdings.entry(owner).or_default().push(bucket);
    }
    holdings
}

/// The owner with the most buckets, ties broken toward the lowest address.
fn most_loaded_except(
    holdings: &BTreeMap<NodeAddress, Vec<BucketId>>,
    except: NodeAddress,
) -> Option<NodeAddress> {
    holdings
        .iter()
        .filter(|(node, buckets)| **node != except && !buckets.is_empty())
        .max_by_key(|(node, buckets)| (buckets.len(), Reverse(**node)))
        .map(|(node, _)| *node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::loopback(port)
    }

    fn planner(bucket_count: u32) -> DistributionPlanner {
        DistributionPlanner::new(DistributionConfig::new(bucket_count))
    }

    /// Two owners with 500 buckets each.
    fn two_node_map() -> DistributionMap {
        let mut map = DistributionMap::bootstrap(addr(9000), 1000);
        for bucket in 500..1000 {
            map.assign(bucket, addr(9001));
        }
        map
    }

    #[test]
    fn test_join_balances_three_ways() {
        let planner = planner(1000);
        let current = two_node_map();

        let map = planner.compute_join(&current, addr(9002)).unwrap();
        map.validate(1000).unwrap();
        assert_eq!(map.view_id(), current.view_id() + 1);

        let counts = map.owner_counts();
        assert_eq!(counts[&addr(9002)], 333);
        let others: Vec<usize> = vec![counts[&addr(9000)], counts[&addr(9001)]];
        assert_eq!(others.iter().sum::<usize>(), 667);
        for c in others {
            assert!((333..=334).contains(&c), "uneven share: {c}");
        }

        // Inputs are untouched.
        assert_eq!(current.owner_counts()[&addr(9000)], 500);
    }

    #[test]
    fn test_join_is_deterministic() {
        let planner = planner(1000);
        let current = two_node_map();
        let a = planner.compute_join(&current, addr(9002)).unwrap();
        let b = planner.compute_join(&current, addr(9002)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_join_rejects_existing_member() {
        let planner = planner(1000);
        let current = two_node_map();
        let err = planner.compute_join(&current, addr(9001)).unwrap_err();
        assert!(matches!(
            err,
            Error::Plan(PlanError::NodeAlreadyPresent(_))
        ));
    }

    #[test]
    fn test_leave_with_replicas_promotes() {
        let planner = planner(1000);
        let current = two_node_map();

        let mut replicas = ReplicaIndex::empty();
        for bucket in current.buckets_owned_by(addr(9001)) {
            replicas.record(bucket, addr(9000));
        }

        let map = planner
            .compute_leave(&current, addr(9001), &replicas)
            .unwrap();
        map.validate(1000).unwrap();
        assert!(map.is_healthy());
        assert_eq!(map.leaving_node(), Some(addr(9001)));
        assert_eq!(map.buckets_owned_by(addr(9001)), Vec::<BucketId>::new());
        assert_eq!(map.owner_counts()[&addr(9000)], 1000);
        // Promotions are recorded as special owners.
        assert_eq!(map.special_owners().count(), 500);
    }

    #[test]
    fn test_leave_without_replicas_orphans() {
        let planner = planner(1000);
        let current = two_node_map();

        let map = planner
            .compute_leave(&current, addr(9001), &ReplicaIndex::empty())
            .unwrap();
        map.validate(1000).unwrap();
        assert!(!map.is_healthy());
        assert_eq!(map.orphaned_buckets().count(), 500);
        // Not silently assigned to a surviving node.
        assert_eq!(map.owner_counts()[&addr(9000)], 500);
    }

    #[test]
    fn test_leave_of_last_node_rejected() {
        let planner = planner(16);
        let map = DistributionMap::bootstrap(addr(9000), 16);
        let err = planner
            .compute_leave(&map, addr(9000), &ReplicaIndex::empty())
            .unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::EmptyCluster)));
    }

    #[test]
    fn test_leave_of_unknown_node_rejected() {
        let planner = planner(1000);
        let err = planner
            .compute_leave(&two_node_map(), addr(9099), &ReplicaIndex::empty())
            .unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::UnknownSourceNode(_))));
    }

    #[test]
    fn test_manual_move_conserves_buckets() {
        let planner = planner(1000);
        let current = two_node_map();
        // Source owns 500; move 50% across two destinations.
        let map = planner
            .compute_manual(
                &current,
                addr(9000),
                &[addr(9002), addr(9003)],
                50.0,
            )
            .unwrap();
        map.validate(1000).unwrap();

        let counts = map.owner_counts();
        assert_eq!(counts[&addr(9000)], 250);
        assert_eq!(counts[&addr(9002)], 125);
        assert_eq!(counts[&addr(9003)], 125);
        assert_eq!(counts[&addr(9001)], 500);
        assert_eq!(counts.values().sum::<usize>(), 1000);
    }

    #[test]
    fn test_manual_move_validation() {
        let planner = planner(1000);
        let current = two_node_map();

        let err = planner
            .compute_manual(&current, addr(9000), &[], 50.0)
            .unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::InsufficientNodes)));

        for percent in [0.0, -1.0, 100.5] {
            let err = planner
                .compute_manual(&current, addr(9000), &[addr(9002)], percent)
                .unwrap_err();
            assert!(matches!(err, Error::Plan(PlanError::InvalidPercent(_))));
        }

        let err = planner
            .compute_manual(&current, addr(9099), &[addr(9002)], 50.0)
            .unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::UnknownSourceNode(_))));
    }

    #[test]
    fn test_rebalance_levels_counts() {
        let planner = planner(1000);
        let mut map = DistributionMap::bootstrap(addr(9000), 1000);
        for bucket in 900..1000 {
            map.assign(bucket, addr(9001));
        }

        let balanced = planner.compute_rebalance(&map).unwrap();
        balanced.validate(1000).unwrap();
        let counts = balanced.owner_counts();
        assert_eq!(counts[&addr(9000)], 500);
        assert_eq!(counts[&addr(9001)], 500);
    }

    #[test]
    fn test_rebalance_not_required_within_threshold() {
        let planner = planner(1000);
        // 505/495 is within the default 10% threshold.
        let mut map = DistributionMap::bootstrap(addr(9000), 1000);
        for bucket in 505..1000 {
            map.assign(bucket, addr(9001));
        }
        let err = planner.compute_rebalance(&map).unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::BalanceNotRequired)));
    }

    #[test]
    fn test_view_id_increases_by_one() {
        let planner = planner(1000);
        let current = two_node_map();
        assert_eq!(current.view_id(), 1);

        let joined = planner.compute_join(&current, addr(9002)).unwrap();
        assert_eq!(joined.view_id(), 2);

        let moved = planner
            .compute_manual(&joined, addr(9002), &[addr(9000)], 10.0)
            .unwrap();
        assert_eq!(moved.view_id(), 3);
    }

    #[test]
    fn test_join_adopts_orphans() {
        let planner = planner(1000);
        let current = two_node_map();
        let orphan_map = planner
            .compute_leave(&current, addr(9001), &ReplicaIndex::empty())
            .unwrap();
        assert_eq!(orphan_map.orphaned_buckets().count(), 500);

        let joined = planner.compute_join(&orphan_map, addr(9002)).unwrap();
        joined.validate(1000).unwrap();
        assert!(joined.is_healthy());
        // The joiner absorbed the orphans and already has a full share.
        assert_eq!(joined.owner_counts()[&addr(9002)], 500);
    }
}
