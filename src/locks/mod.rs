//! Per-key advisory locks.
//!
//! Read/write operations routed through the bucket layer consult the
//! registry before touching a key. Locks expire lazily: an expired entry is
//! treated as absent but is only swept when the key is next touched — there
//! is no background sweeper.

use crate::clock::Clock;
use crate::error::LockError;
use crate::metrics::DistributionMetrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// How a lock request treats an existing holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAccessType {
    /// Acquire normally; fail if an unexpired lock with a different id
    /// exists.
    Default,
    /// Only check for conflicts; never create or replace an entry.
    DontAcquire,
    /// Administrative override: take the lock even from an unexpired
    /// holder.
    PreemptIfExpired,
}

/// An active lock on a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Opaque id presented by the lock holder.
    pub lock_id: Uuid,
    /// When the lock was granted, milliseconds since the Unix epoch.
    pub acquired_at_millis: u64,
    /// When the lock lapses, milliseconds since the Unix epoch.
    pub expires_at_millis: u64,
    /// Access type the lock was granted with.
    pub access_type: LockAccessType,
}

impl LockEntry {
    /// Whether the lock has lapsed at the given timestamp.
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        self.expires_at_millis <= now_millis
    }
}

/// Proof of a granted lock, presented back on unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    /// The locked key.
    pub key: String,
    /// The id the lock was granted under.
    pub lock_id: Uuid,
}

/// Registry of per-key advisory locks.
///
/// One entry per actively locked key; the sharded map keeps contention on
/// unrelated keys apart. Time comes from the injected [`Clock`], so expiry
/// is deterministic under test.
#[derive(Debug)]
pub struct LockRegistry {
    entries: DashMap<String, LockEntry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<DistributionMetrics>,
}

impl LockRegistry {
    /// Create a registry reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_metrics(clock, Arc::new(DistributionMetrics::new()))
    }

    /// Create a registry sharing an existing metrics registry.
    pub fn with_metrics(clock: Arc<dyn Clock>, metrics: Arc<DistributionMetrics>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            metrics,
        }
    }

    /// Try to lock a key for `timeout`.
    ///
    /// Presenting the id of the current holder succeeds idempotently
    /// without creating a second entry. An expired lock is treated as
    /// absent. [`LockAccessType::PreemptIfExpired`] additionally overrides
    /// an unexpired holder — an administrative takeover.
    pub fn try_lock(
        &self,
        key: &str,
        lock_id: Uuid,
        access_type: LockAccessType,
        timeout: Duration,
    ) -> Result<LockToken, LockError> {
        let now = self.clock.now_millis();
        let token = LockToken {
            key: key.to_string(),
            lock_id,
        };

        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let holder = occupied.get();
                if !holder.is_expired_at(now) {
                    if holder.lock_id == lock_id {
                        // Re-entrant acquisition of the caller's own lock.
                        return Ok(token);
                    }
                    if access_type != LockAccessType::PreemptIfExpired {
                        self.metrics.lock_contentions.inc();
                        return Err(LockError::AlreadyLocked {
                            key: key.to_string(),
                        });
                    }
                }
                if access_type == LockAccessType::DontAcquire {
                    return Ok(token);
                }
                occupied.insert(Self::entry(lock_id, access_type, now, timeout));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                if access_type == LockAccessType::DontAcquire {
                    return Ok(token);
                }
                vacant.insert(Self::entry(lock_id, access_type, now, timeout));
            }
        }

        self.metrics.locks_acquired.inc();
        debug!(key, %lock_id, "Lock granted");
        Ok(token)
    }

    /// Release a key.
    ///
    /// A missing lock is a no-op. With `preemptive` the entry is removed
    /// regardless of id; otherwise the presented id must match the holder.
    pub fn unlock(&self, key: &str, lock_id: Uuid, preemptive: bool) -> Result<(), LockError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(());
        };
        let matches = entry.lock_id == lock_id;
        drop(entry);

        if preemptive || matches {
            self.entries.remove(key);
            debug!(key, %lock_id, preemptive, "Lock released");
            return Ok(());
        }
        Err(LockError::LockMismatch {
            key: key.to_string(),
        })
    }

    /// The active lock on a key, if any. Read-only: an expired entry is
    /// reported as absent but left in place.
    pub fn is_locked(&self, key: &str) -> Option<LockEntry> {
        let now = self.clock.now_millis();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value().clone())
    }

    /// Number of entries in the registry, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(
        lock_id: Uuid,
        access_type: LockAccessType,
        now_millis: u64,
        timeout: Duration,
    ) -> LockEntry {
        LockEntry {
            lock_id,
            acquired_at_millis: now_millis,
            expires_at_millis: now_millis + timeout.as_millis() as u64,
            access_type,
        }
    }
}
