//! Lock handle
//!
//! A `LockHandle` is bound to one lock name and one owner token and is shared
//! by every task of the process that asks the registry for that name. It
//! mirrors the store's reentrancy count locally, keeps held leases alive with
//! the registry's renewal scheduler, and turns store failures into "not held"
//! answers after logging them. Only interruption of a blocking wait is
//! reported as an error.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tenure_common::OwnerScope;
use tenure_store::{AcquireOutcome, LockCoordinator, LockSnapshot, ReleaseOutcome, StoreError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LockError, Result};
use crate::stats::StatsCollector;
use crate::token::OwnerToken;
use crate::watchdog::{RenewalJob, RenewalScheduler, RenewalVerdict};

/// Behaviour shared by every handle of a registry
#[derive(Debug, Clone)]
pub(crate) struct HandleSettings {
    pub auto_renew: bool,
    pub retry_interval: Duration,
    pub owner_scope: OwnerScope,
}

/// Local view of one owner's holds
#[derive(Debug, Clone, Copy)]
struct Hold {
    count: u32,
    /// Lease in effect, reused when a partial release resets the TTL
    lease: Duration,
}

struct HandleInner {
    name: String,
    key: String,
    token: OwnerToken,
    default_lease: Duration,
    settings: HandleSettings,
    coordinator: Arc<dyn LockCoordinator>,
    scheduler: RenewalScheduler,
    stats: Arc<StatsCollector>,
    holds: DashMap<OwnerToken, Hold>,
}

#[derive(Clone)]
pub struct LockHandle {
    inner: Arc<HandleInner>,
}

impl LockHandle {
    pub(crate) fn new(
        name: String,
        key: String,
        default_lease: Duration,
        settings: HandleSettings,
        coordinator: Arc<dyn LockCoordinator>,
        scheduler: RenewalScheduler,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name,
                key,
                token: OwnerToken::generate(),
                default_lease,
                settings,
                coordinator,
                scheduler,
                stats,
                holds: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Store key of this lock (name with the configured prefix)
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Token generated for this handle
    pub fn owner_token(&self) -> &OwnerToken {
        &self.inner.token
    }

    /// Token identifying the caller under the configured owner scope
    pub fn current_owner(&self) -> OwnerToken {
        self.inner.token.scoped(self.inner.settings.owner_scope)
    }

    pub fn default_lease(&self) -> Duration {
        self.inner.default_lease
    }

    // ------------------------------------------------------------------
    // Acquisition
    // ------------------------------------------------------------------

    /// Single attempt with the default lease.
    pub async fn try_lock(&self) -> bool {
        self.try_lock_with_lease(self.inner.default_lease).await
    }

    /// Single attempt with an explicit lease.
    pub async fn try_lock_with_lease(&self, lease: Duration) -> bool {
        let owner = self.current_owner();
        match self.inner.attempt(&owner, lease).await {
            Ok(outcome) => outcome.is_granted(),
            Err(e) => {
                self.inner.store_failed("acquire", &e);
                false
            }
        }
    }

    /// Retry until granted or until `wait` has elapsed.
    pub async fn try_lock_for(&self, wait: Duration, lease: Duration) -> Result<bool> {
        self.try_lock_for_cancellable(wait, lease, &CancellationToken::new())
            .await
    }

    /// Like [`try_lock_for`](Self::try_lock_for), aborting with
    /// `LockError::Interrupted` as soon as `cancel` fires.
    ///
    /// The deadline also bounds a store call that is still in flight.
    pub async fn try_lock_for_cancellable(
        &self,
        wait: Duration,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.acquire_until(lease, Some(Instant::now() + wait), cancel)
            .await
    }

    /// Retry until granted.
    pub async fn lock(&self, lease: Duration) -> Result<()> {
        self.lock_cancellable(lease, &CancellationToken::new()).await
    }

    pub async fn lock_cancellable(&self, lease: Duration, cancel: &CancellationToken) -> Result<()> {
        self.acquire_until(lease, None, cancel).await.map(|_| ())
    }

    async fn acquire_until(
        &self,
        lease: Duration,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let inner = &self.inner;
        let owner = self.current_owner();

        loop {
            if cancel.is_cancelled() {
                return Err(LockError::Interrupted);
            }

            // The call runs detached so a grant that lands after we stop
            // waiting can still be handed back to the store.
            let mut pending = inner.spawn_acquire(&owner, lease);
            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                joined = within(deadline, &mut pending) => Some(joined),
            };
            let joined = match waited {
                Some(Some(joined)) => joined,
                gave_up => {
                    inner.abandon_acquire(pending, owner, lease);
                    return match gave_up {
                        None => Err(LockError::Interrupted),
                        Some(_) => Ok(false),
                    };
                }
            };

            let pause = match joined {
                Ok(Ok(outcome)) => {
                    inner.record_outcome(&owner, lease, outcome);
                    match outcome {
                        AcquireOutcome::Granted { .. } => return Ok(true),
                        AcquireOutcome::Denied { remaining_ttl } => {
                            inner.retry_pause(remaining_ttl)
                        }
                    }
                }
                Ok(Err(e)) => {
                    inner.store_failed("acquire", &e);
                    inner.settings.retry_interval
                }
                Err(e) => {
                    warn!(lock = %inner.name, error = %e, "Acquire task failed");
                    inner.settings.retry_interval
                }
            };

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    pause.min(deadline - now)
                }
                None => pause,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::Interrupted),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Release one hold. Returns whether a hold owned by the caller was released.
    pub async fn unlock(&self) -> bool {
        match self.release().await {
            Ok(outcome) => outcome.is_released(),
            Err(e) => {
                warn!(lock = %self.inner.name, error = %e, "Failed to unlock");
                false
            }
        }
    }

    /// Release one hold and report what happened in the store.
    ///
    /// `NotOwner` leaves local state untouched. A full release stops the
    /// watchdog for the caller's token.
    pub async fn release(&self) -> Result<ReleaseOutcome> {
        let inner = &self.inner;
        let owner = self.current_owner();
        let lease = inner
            .holds
            .get(&owner)
            .map(|hold| hold.lease)
            .unwrap_or(inner.default_lease);

        let outcome = match inner
            .coordinator
            .release(&inner.key, owner.as_str(), lease)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                inner.stats.record_store_error();
                return Err(e.into());
            }
        };

        match outcome {
            ReleaseOutcome::NotOwner => {
                warn!(lock = %inner.name, owner = %owner, "Unlock attempted by a non-owner");
            }
            ReleaseOutcome::Partial { remaining } => {
                inner
                    .holds
                    .entry(owner.clone())
                    .and_modify(|hold| hold.count = remaining)
                    .or_insert(Hold {
                        count: remaining,
                        lease,
                    });
                inner.stats.record_released();
                debug!(lock = %inner.name, owner = %owner, remaining, "Lock partially released");
            }
            ReleaseOutcome::FullyReleased => {
                inner.holds.remove(&owner);
                inner.scheduler.cancel(&inner.watchdog_key(&owner));
                inner.stats.record_released();
                debug!(lock = %inner.name, owner = %owner, "Lock released");
            }
        }
        Ok(outcome)
    }

    /// Delete the lock record whoever holds it, then drop all local holds
    /// and watchdogs of this handle. Returns whether a record was deleted.
    pub async fn force_unlock(&self) -> bool {
        let inner = &self.inner;
        let released = match inner.coordinator.force_release(&inner.key).await {
            Ok(released) => released,
            Err(e) => {
                inner.store_failed("force_release", &e);
                false
            }
        };

        let owners: Vec<OwnerToken> = inner.holds.iter().map(|e| e.key().clone()).collect();
        inner.holds.clear();
        for owner in &owners {
            inner.scheduler.cancel(&inner.watchdog_key(owner));
        }

        if released {
            inner.stats.record_force_released();
            warn!(lock = %inner.name, "Lock force released");
        }
        released
    }

    // ------------------------------------------------------------------
    // Renewal
    // ------------------------------------------------------------------

    /// Reset the lease to `lease` if the caller still owns the lock.
    ///
    /// With auto-renew on, the watchdog continues with the new lease.
    pub async fn renew_lease(&self, lease: Duration) -> bool {
        let inner = &self.inner;
        let owner = self.current_owner();
        match inner
            .coordinator
            .renew(&inner.key, owner.as_str(), lease)
            .await
        {
            Ok(true) => {
                inner.stats.record_renewed();
                let held = match inner.holds.get_mut(&owner) {
                    Some(mut hold) => {
                        hold.lease = lease;
                        true
                    }
                    None => false,
                };
                if held && inner.settings.auto_renew {
                    inner.schedule_watchdog(&owner, lease);
                }
                true
            }
            Ok(false) => {
                inner.lease_lost(&owner);
                false
            }
            Err(e) => {
                inner.store_failed("renew", &e);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current store record of this lock
    pub async fn inspect(&self) -> Result<LockSnapshot> {
        self.inner
            .coordinator
            .inspect(&self.inner.key)
            .await
            .map_err(|e| {
                self.inner.stats.record_store_error();
                e.into()
            })
    }

    /// Whether anyone holds the lock
    pub async fn is_locked(&self) -> bool {
        self.snapshot_or_unlocked().await.held
    }

    pub async fn is_held_by_current_owner(&self) -> bool {
        self.snapshot_or_unlocked()
            .await
            .is_owned_by(self.current_owner().as_str())
    }

    /// Reentrancy count of the caller according to the store
    pub async fn hold_count(&self) -> u32 {
        let snapshot = self.snapshot_or_unlocked().await;
        if snapshot.is_owned_by(self.current_owner().as_str()) {
            snapshot.hold_count
        } else {
            0
        }
    }

    /// Remaining lease of the current holder, `None` when unlocked
    pub async fn remaining_time_to_live(&self) -> Option<Duration> {
        let snapshot = self.snapshot_or_unlocked().await;
        if snapshot.held { snapshot.ttl } else { None }
    }

    /// Reentrancy count of the caller as tracked locally, without a store call
    pub fn local_hold_count(&self) -> u32 {
        self.inner
            .holds
            .get(&self.current_owner())
            .map(|hold| hold.count)
            .unwrap_or(0)
    }

    /// Whether a watchdog is currently renewing the caller's lease
    pub fn is_renewing(&self) -> bool {
        let key = self.inner.watchdog_key(&self.current_owner());
        self.inner.scheduler.is_scheduled(&key)
    }

    async fn snapshot_or_unlocked(&self) -> LockSnapshot {
        match self.inner.coordinator.inspect(&self.inner.key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.inner.store_failed("inspect", &e);
                LockSnapshot::unlocked()
            }
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("name", &self.inner.name)
            .field("key", &self.inner.key)
            .field("token", &self.inner.token)
            .field("default_lease", &self.inner.default_lease)
            .finish()
    }
}

impl HandleInner {
    async fn attempt(
        self: &Arc<Self>,
        owner: &OwnerToken,
        lease: Duration,
    ) -> std::result::Result<AcquireOutcome, StoreError> {
        let outcome = self
            .coordinator
            .acquire(&self.key, owner.as_str(), lease)
            .await?;
        self.record_outcome(owner, lease, outcome);
        Ok(outcome)
    }

    /// Mirror an acquire result locally: hold count, stats and watchdog.
    fn record_outcome(self: &Arc<Self>, owner: &OwnerToken, lease: Duration, outcome: AcquireOutcome) {
        match outcome {
            AcquireOutcome::Granted { hold_count } => {
                self.holds.insert(
                    owner.clone(),
                    Hold {
                        count: hold_count,
                        lease,
                    },
                );
                self.stats.record_acquired();
                debug!(
                    lock = %self.name,
                    owner = %owner,
                    hold_count,
                    lease_ms = lease.as_millis() as u64,
                    "Lock acquired"
                );
                if self.settings.auto_renew {
                    self.schedule_watchdog(owner, lease);
                }
            }
            AcquireOutcome::Denied { .. } => self.stats.record_denied(),
        }
    }

    fn spawn_acquire(
        &self,
        owner: &OwnerToken,
        lease: Duration,
    ) -> JoinHandle<std::result::Result<AcquireOutcome, StoreError>> {
        let coordinator = self.coordinator.clone();
        let key = self.key.clone();
        let owner = owner.clone();
        self.scheduler.spawn(async move {
            coordinator.acquire(&key, owner.as_str(), lease).await
        })
    }

    /// Give back a grant that arrives after the caller stopped waiting for it.
    fn abandon_acquire(
        self: &Arc<Self>,
        pending: JoinHandle<std::result::Result<AcquireOutcome, StoreError>>,
        owner: OwnerToken,
        lease: Duration,
    ) {
        let inner = Arc::clone(self);
        self.scheduler.spawn(async move {
            let Ok(Ok(AcquireOutcome::Granted { .. })) = pending.await else {
                return;
            };
            let lease = inner
                .holds
                .get(&owner)
                .map(|hold| hold.lease)
                .unwrap_or(lease);

            match inner
                .coordinator
                .release(&inner.key, owner.as_str(), lease)
                .await
            {
                Ok(ReleaseOutcome::Partial { remaining }) => {
                    if let Some(mut hold) = inner.holds.get_mut(&owner) {
                        hold.count = remaining;
                    }
                    debug!(lock = %inner.name, owner = %owner, remaining, "Returned late grant");
                }
                Ok(ReleaseOutcome::FullyReleased) => {
                    // Any local hold predates a lost lease
                    inner.holds.remove(&owner);
                    inner.scheduler.cancel(&inner.watchdog_key(&owner));
                    debug!(lock = %inner.name, owner = %owner, "Returned late grant");
                }
                Ok(ReleaseOutcome::NotOwner) => {}
                Err(e) => inner.store_failed("release", &e),
            }
        });
    }

    /// Pause before the next attempt after a denial
    fn retry_pause(&self, remaining_ttl: Duration) -> Duration {
        let retry = self.settings.retry_interval;
        if remaining_ttl.is_zero() {
            retry
        } else {
            retry.min(remaining_ttl)
        }
    }

    fn watchdog_key(&self, owner: &OwnerToken) -> String {
        format!("{}#{}", self.key, owner)
    }

    fn schedule_watchdog(self: &Arc<Self>, owner: &OwnerToken, lease: Duration) {
        let handle: Weak<HandleInner> = Arc::downgrade(self);
        let tick_owner = owner.clone();
        let job: RenewalJob = Arc::new(move || {
            let handle = handle.clone();
            let owner = tick_owner.clone();
            async move {
                match handle.upgrade() {
                    Some(inner) => inner.renew_tick(&owner, lease).await,
                    None => RenewalVerdict::Stop,
                }
            }
            .boxed()
        });

        if let Err(e) = self
            .scheduler
            .schedule(self.watchdog_key(owner), lease / 3, job)
        {
            warn!(
                lock = %self.name,
                owner = %owner,
                error = %e,
                "Lease will not be renewed automatically"
            );
        }
    }

    async fn renew_tick(&self, owner: &OwnerToken, lease: Duration) -> RenewalVerdict {
        let still_held = self.holds.get(owner).is_some_and(|hold| hold.count > 0);
        if !still_held {
            return RenewalVerdict::Stop;
        }

        match self.coordinator.renew(&self.key, owner.as_str(), lease).await {
            Ok(true) => {
                self.stats.record_renewed();
                RenewalVerdict::Continue
            }
            Ok(false) => {
                self.lease_lost(owner);
                RenewalVerdict::Stop
            }
            Err(e) => {
                self.store_failed("renew", &e);
                warn!(lock = %self.name, owner = %owner, "Stopping lease watchdog after renewal failure");
                RenewalVerdict::Stop
            }
        }
    }

    /// The store no longer recognizes `owner` as holder
    fn lease_lost(&self, owner: &OwnerToken) {
        let had_hold = self.holds.remove(owner).is_some();
        self.scheduler.cancel(&self.watchdog_key(owner));
        if had_hold {
            self.stats.record_lost();
            warn!(lock = %self.name, owner = %owner, "Lock lease lost");
        }
    }

    fn store_failed(&self, operation: &str, error: &StoreError) {
        self.stats.record_store_error();
        warn!(lock = %self.name, operation, error = %error, "Lock store call failed");
    }
}

/// Run `future`, giving up at `deadline` if one is set
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}
