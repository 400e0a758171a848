//! In-process lock coordinator
//!
//! Records live in a `DashMap`; every operation runs under the shard lock of
//! its key, which makes it atomic with respect to other callers in the same
//! process. Expiry is lazy and measured on the tokio clock, so lease timing
//! can be exercised on a paused runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use crate::coordinator::LockCoordinator;
use crate::error::Result;
use crate::model::{AcquireOutcome, LockSnapshot, ReleaseOutcome};

struct MemoryRecord {
    owner: String,
    count: u32,
    expires_at: Instant,
}

impl MemoryRecord {
    fn new(owner: &str, lease: Duration, now: Instant) -> Self {
        Self {
            owner: owner.to_string(),
            count: 1,
            expires_at: now + lease,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Coordinator whose records live in this process.
///
/// Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    records: Arc<DashMap<String, MemoryRecord>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(count = purged, "Purged expired lock records");
        }
        purged
    }

    /// Number of stored records, including expired ones not yet purged
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl LockCoordinator for MemoryCoordinator {
    async fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<AcquireOutcome> {
        let now = Instant::now();
        let outcome = match self.records.entry(name.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryRecord::new(owner, lease, now));
                AcquireOutcome::Granted { hold_count: 1 }
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = MemoryRecord::new(owner, lease, now);
                    AcquireOutcome::Granted { hold_count: 1 }
                } else if record.owner == owner {
                    record.count += 1;
                    record.expires_at = now + lease;
                    AcquireOutcome::Granted {
                        hold_count: record.count,
                    }
                } else {
                    AcquireOutcome::Denied {
                        remaining_ttl: record.remaining(now),
                    }
                }
            }
        };
        Ok(outcome)
    }

    async fn release(&self, name: &str, owner: &str, lease: Duration) -> Result<ReleaseOutcome> {
        let now = Instant::now();
        let outcome = match self.records.entry(name.to_string()) {
            Entry::Vacant(_) => ReleaseOutcome::NotOwner,
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    occupied.remove();
                    ReleaseOutcome::NotOwner
                } else if record.owner != owner {
                    ReleaseOutcome::NotOwner
                } else if record.count > 1 {
                    record.count -= 1;
                    record.expires_at = now + lease;
                    ReleaseOutcome::Partial {
                        remaining: record.count,
                    }
                } else {
                    occupied.remove();
                    ReleaseOutcome::FullyReleased
                }
            }
        };
        Ok(outcome)
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let now = Instant::now();
        let renewed = match self.records.entry(name.to_string()) {
            Entry::Vacant(_) => false,
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    occupied.remove();
                    false
                } else if record.owner == owner {
                    record.expires_at = now + lease;
                    true
                } else {
                    false
                }
            }
        };
        Ok(renewed)
    }

    async fn force_release(&self, name: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .records
            .remove(name)
            .is_some_and(|(_, record)| !record.is_expired(now)))
    }

    async fn inspect(&self, name: &str) -> Result<LockSnapshot> {
        let now = Instant::now();
        let snapshot = match self.records.get(name) {
            Some(record) if !record.is_expired(now) => LockSnapshot {
                held: true,
                ttl: Some(record.remaining(now)),
                owner: Some(record.owner.clone()),
                hold_count: record.count,
            },
            _ => LockSnapshot::unlocked(),
        };
        Ok(snapshot)
    }
}
