//! Buckets: the atomic unit of ownership and migration.
//!
//! The key space is partitioned into a fixed number of logical buckets. Each
//! bucket records a permanent owner (authoritative once stable), a temporary
//! owner (the node currently serving it) and a transfer status. The
//! [`BucketTable`] holds every bucket and supports waiting for status
//! transitions during state transfer.

mod table;

pub use table::BucketTable;

use crate::types::{BucketId, NodeAddress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Transfer status of a bucket.
///
/// Within a single transfer episode the status moves monotonically:
/// `NeedTransfer -> UnderTransfer -> Functional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketStatus {
    /// Ownership was reassigned but data has not started moving.
    NeedTransfer,
    /// Bucket data is being copied to the new owner.
    UnderTransfer,
    /// Bucket is stable and fully served by its owner.
    Functional,
}

impl BucketStatus {
    /// The mask bit for this status.
    pub fn mask(self) -> StatusMask {
        match self {
            BucketStatus::NeedTransfer => StatusMask::NEED_TRANSFER,
            BucketStatus::UnderTransfer => StatusMask::UNDER_TRANSFER,
            BucketStatus::Functional => StatusMask::FUNCTIONAL,
        }
    }
}

impl fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketStatus::NeedTransfer => write!(f, "need_transfer"),
            BucketStatus::UnderTransfer => write!(f, "under_transfer"),
            BucketStatus::Functional => write!(f, "functional"),
        }
    }
}

/// A set of [`BucketStatus`] values a waiter accepts.
///
/// Combine masks with `|`:
///
/// ```
/// use partmap::bucket::{BucketStatus, StatusMask};
///
/// let mask = StatusMask::FUNCTIONAL | StatusMask::NEED_TRANSFER;
/// assert!(mask.contains(BucketStatus::Functional));
/// assert!(!mask.contains(BucketStatus::UnderTransfer));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMask(u8);

impl StatusMask {
    /// Matches [`BucketStatus::NeedTransfer`].
    pub const NEED_TRANSFER: StatusMask = StatusMask(0b001);
    /// Matches [`BucketStatus::UnderTransfer`].
    pub const UNDER_TRANSFER: StatusMask = StatusMask(0b010);
    /// Matches [`BucketStatus::Functional`].
    pub const FUNCTIONAL: StatusMask = StatusMask(0b100);
    /// Matches any status.
    pub const ANY: StatusMask = StatusMask(0b111);

    /// Check whether the mask accepts the given status.
    pub fn contains(self, status: BucketStatus) -> bool {
        self.0 & status.mask().0 != 0
    }
}

impl BitOr for StatusMask {
    type Output = StatusMask;

    fn bitor(self, rhs: StatusMask) -> StatusMask {
        StatusMask(self.0 | rhs.0)
    }
}

/// Point-in-time view of a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Stable bucket identifier.
    pub id: BucketId,
    /// The node considered authoritative once no transfer is in progress.
    pub permanent_owner: NodeAddress,
    /// The node currently serving the bucket. Equal to the permanent owner
    /// when the bucket is stable.
    pub temp_owner: NodeAddress,
    /// Current transfer status.
    pub status: BucketStatus,
}

impl Bucket {
    /// The node currently serving the bucket.
    pub fn current_owner(&self) -> NodeAddress {
        self.temp_owner
    }

    /// Whether the bucket is stable: functional and not mid-handover.
    pub fn is_stable(&self) -> bool {
        self.status == BucketStatus::Functional && self.permanent_owner == self.temp_owner
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bucket {} [{}] perm={} temp={}",
            self.id, self.status, self.permanent_owner, self.temp_owner
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mask() {
        let mask = StatusMask::FUNCTIONAL | StatusMask::NEED_TRANSFER;
        assert!(mask.contains(BucketStatus::Functional));
        assert!(mask.contains(BucketStatus::NeedTransfer));
        assert!(!mask.contains(BucketStatus::UnderTransfer));

        assert!(StatusMask::ANY.contains(BucketStatus::UnderTransfer));
    }

    #[test]
    fn test_bucket_stability() {
        let a = NodeAddress::loopback(9000);
        let b = NodeAddress::loopback(9001);

        let stable = Bucket {
            id: 0,
            permanent_owner: a,
            temp_owner: a,
            status: BucketStatus::Functional,
        };
        assert!(stable.is_stable());
        assert_eq!(stable.current_owner(), a);

        let moving = Bucket {
            id: 0,
            permanent_owner: a,
            temp_owner: b,
            status: BucketStatus::UnderTransfer,
        };
        assert!(!moving.is_stable());
        assert_eq!(moving.current_owner(), b);
    }
}
