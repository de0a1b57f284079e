//! Transfer plans: the diff between two distribution maps.

use crate::distribution::DistributionMap;
use crate::types::{BucketId, NodeAddress, ViewId};

/// A single bucket hand-off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketMove {
    /// Bucket being moved.
    pub bucket_id: BucketId,
    /// Node the data comes from.
    pub from: NodeAddress,
    /// Node the data goes to.
    pub to: NodeAddress,
    /// Share of the source's buckets this move was part of, when the plan
    /// came from a manual percentage move.
    pub percent_hint: Option<f32>,
}

/// The set of bucket moves that takes the cluster from one map to the next.
///
/// Derived, never persisted: recomputed from the two maps whenever needed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    /// View id of the map the plan starts from.
    pub source_view: ViewId,
    /// View id of the map the plan establishes.
    pub target_view: ViewId,
    /// Moves in ascending bucket-id order.
    pub moves: Vec<BucketMove>,
}

impl TransferPlan {
    /// Diff two maps into a plan.
    ///
    /// Special-owner buckets ship no data (the promoted replica already
    /// holds it) and orphaned buckets have no reachable source, so neither
    /// produces a move.
    pub fn between(old: &DistributionMap, new: &DistributionMap) -> Self {
        let mut moves = Vec::new();
        for (bucket_id, _) in new.assignments() {
            if new.is_special(bucket_id) || new.is_orphaned(bucket_id) {
                continue;
            }
            let from = match old.owner_of(bucket_id) {
                Some(owner) => owner,
                None => continue,
            };
            let to = new.owner_of(bucket_id).expect("id came from the map");
            if from != to {
                moves.push(BucketMove {
                    bucket_id,
                    from,
                    to,
                    percent_hint: None,
                });
            }
        }
        Self {
            source_view: old.view_id(),
            target_view: new.view_id(),
            moves,
        }
    }

    /// Attach a percentage hint to every move, for plans derived from a
    /// manual move.
    pub fn with_percent_hint(mut self, percent: f32) -> Self {
        for m in &mut self.moves {
            m.percent_hint = Some(percent);
        }
        self
    }

    /// Number of moves in the plan.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Whether the plan has no moves.
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::loopback(port)
    }

    #[test]
    fn test_identical_maps_produce_empty_plan() {
        let map = DistributionMap::bootstrap(addr(9000), 8);
        let plan = TransferPlan::between(&map, &map);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_diff_orders_by_bucket_id() {
        let old = DistributionMap::bootstrap(addr(9000), 8);
        let mut new = old.clone();
        new.assign(6, addr(9001));
        new.assign(2, addr(9001));
        new.bump_view();

        let plan = TransferPlan::between(&old, &new);
        assert_eq!(plan.source_view, 1);
        assert_eq!(plan.target_view, 2);
        assert_eq!(
            plan.moves.iter().map(|m| m.bucket_id).collect::<Vec<_>>(),
            vec![2, 6]
        );
        for m in &plan.moves {
            assert_eq!(m.from, addr(9000));
            assert_eq!(m.to, addr(9001));
        }
    }

    #[test]
    fn test_special_and_orphaned_ship_nothing() {
        let old = DistributionMap::bootstrap(addr(9000), 8);
        let mut new = old.clone();
        new.assign(1, addr(9001));
        new.assign_special(2, addr(9002));
        new.mark_orphaned(3);
        new.bump_view();

        let plan = TransferPlan::between(&old, &new);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.moves[0].bucket_id, 1);
    }

    #[test]
    fn test_percent_hint() {
        let old = DistributionMap::bootstrap(addr(9000), 4);
        let mut new = old.clone();
        new.assign(0, addr(9001));
        new.bump_view();

        let plan = TransferPlan::between(&old, &new).with_percent_hint(50.0);
        assert_eq!(plan.moves[0].percent_hint, Some(50.0));
    }
}
