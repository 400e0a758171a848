//! Lock registry
//!
//! The registry is an explicit context object: the application creates it at
//! startup, asks it for handles by name and calls `destroy` at shutdown. It
//! owns the only renewal scheduler, so every handle it hands out shares one
//! set of watchdog loops on one runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tenure_common::LockConfig;
use tenure_store::LockCoordinator;
use tracing::{debug, info, warn};

use crate::error::{LockError, Result};
use crate::handle::{HandleSettings, LockHandle};
use crate::stats::{LockStats, StatsCollector};
use crate::watchdog::RenewalScheduler;

pub struct LockRegistry {
    coordinator: Arc<dyn LockCoordinator>,
    config: LockConfig,
    settings: HandleSettings,
    scheduler: RenewalScheduler,
    stats: Arc<StatsCollector>,
    locks: DashMap<String, LockHandle>,
    destroyed: AtomicBool,
}

impl LockRegistry {
    /// Create a registry on the current tokio runtime.
    pub fn new(coordinator: Arc<dyn LockCoordinator>, config: LockConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = RenewalScheduler::current()?;

        info!(
            key_prefix = %config.key_prefix,
            default_lease_ms = config.default_lease_ms,
            auto_renew = config.auto_renew,
            owner_scope = ?config.owner_scope,
            "Lock registry created"
        );

        let settings = HandleSettings {
            auto_renew: config.auto_renew,
            retry_interval: config.retry_interval(),
            owner_scope: config.owner_scope,
        };

        Ok(Self {
            coordinator,
            config,
            settings,
            scheduler,
            stats: Arc::new(StatsCollector::default()),
            locks: DashMap::new(),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Cached handle for `name`, created with the default lease if absent.
    pub fn get_lock(&self, name: &str) -> Result<LockHandle> {
        self.get_lock_with_lease(name, self.config.default_lease())
    }

    /// Cached handle for `name`, created with `default_lease` if absent.
    ///
    /// A handle that is already cached keeps the lease it was created with.
    pub fn get_lock_with_lease(&self, name: &str, default_lease: Duration) -> Result<LockHandle> {
        if self.is_destroyed() {
            return Err(LockError::RegistryDestroyed);
        }

        let handle = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(lock = %name, "Creating lock handle");
                LockHandle::new(
                    name.to_string(),
                    self.config.key_for(name),
                    default_lease,
                    self.settings.clone(),
                    self.coordinator.clone(),
                    self.scheduler.clone(),
                    self.stats.clone(),
                )
            })
            .clone();

        // destroy() may have cleared the cache between the check and the insert
        if self.is_destroyed() {
            self.locks.remove(name);
            return Err(LockError::RegistryDestroyed);
        }
        Ok(handle)
    }

    /// Evict the cached handle for `name`. Any remote lock it holds stays held.
    pub fn remove_lock(&self, name: &str) -> Option<LockHandle> {
        self.locks.remove(name).map(|(_, handle)| handle)
    }

    pub fn clear_all_locks(&self) {
        self.locks.clear();
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn lock_names(&self) -> Vec<String> {
        self.locks.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }

    /// Number of leases currently kept alive by a watchdog
    pub fn active_renewals(&self) -> usize {
        self.scheduler.active_count()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Stop all renewals and clear the cache.
    ///
    /// Handles obtained earlier keep working against the store but no longer
    /// schedule renewals. Calling this twice is a no-op.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            warn!("Lock registry already destroyed");
            return;
        }
        let renewals = self.scheduler.active_count();
        self.scheduler.shutdown();
        self.locks.clear();
        info!(cancelled_renewals = renewals, "Lock registry destroyed");
    }
}

impl Drop for LockRegistry {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            warn!("Lock registry dropped without destroy(); stopping renewals");
            self.destroy();
        }
    }
}
