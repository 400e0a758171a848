//! The coordinator trait: five operations on a lock record, each executed
//! as one indivisible unit in the store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AcquireOutcome, LockSnapshot, ReleaseOutcome};

/// Atomic lock operations against a shared store.
///
/// `name` is the full store key. Implementations must never split the
/// ownership check and the mutation of one operation across two round trips.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Create `{owner: 1}` when no record exists, increment the count when
    /// `owner` already holds it, and reset the TTL to `lease` in both cases.
    /// Otherwise deny and report the holder's remaining TTL.
    async fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<AcquireOutcome>;

    /// Decrement `owner`'s count. A count still above zero resets the TTL to
    /// `lease`; a count of zero deletes the record.
    async fn release(&self, name: &str, owner: &str, lease: Duration) -> Result<ReleaseOutcome>;

    /// Reset the TTL to `lease` if `owner` still holds the record.
    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool>;

    /// Delete the record whoever holds it. Returns whether a record existed.
    async fn force_release(&self, name: &str) -> Result<bool>;

    /// Read-only snapshot; not atomic with respect to concurrent mutations.
    async fn inspect(&self, name: &str) -> Result<LockSnapshot>;
}
