//! Distribution maps and the planner that computes them.
//!
//! A [`DistributionMap`] is an immutable-per-version snapshot of the
//! bucket-to-owner assignment. The [`DistributionPlanner`] produces a new map
//! for every topology or balance event; the previous map is superseded, never
//! mutated in place. A [`TransferPlan`] is the diff between two maps and
//! drives the state transfer coordinator.

mod codec;
mod map;
mod plan;
mod planner;

pub use codec::{deserialize_distribution_map, serialize_distribution_map};
pub use map::{DistributionMap, ReplicaIndex};
pub use plan::{BucketMove, TransferPlan};
pub use planner::DistributionPlanner;
