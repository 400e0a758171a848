//! Lock statistics
//!
//! Counters are kept per registry and mirrored to the `metrics` facade;
//! without an installed recorder the facade calls are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, describe_counter};

/// Point-in-time copy of a registry's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Granted acquisitions, reentrant ones included
    pub acquisitions: u64,
    /// Acquire attempts denied because another owner held the lock
    pub failed_acquisitions: u64,
    pub releases: u64,
    /// Successful watchdog and manual renewals
    pub renewals: u64,
    /// Leases found to be no longer owned when renewing
    pub lost_leases: u64,
    pub force_releases: u64,
    pub store_errors: u64,
}

#[derive(Default)]
pub(crate) struct StatsCollector {
    acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
    releases: AtomicU64,
    renewals: AtomicU64,
    lost_leases: AtomicU64,
    force_releases: AtomicU64,
    store_errors: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn record_acquired(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_acquisitions_total").increment(1);
    }

    pub(crate) fn record_denied(&self) {
        self.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_failed_acquisitions_total").increment(1);
    }

    pub(crate) fn record_released(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_releases_total").increment(1);
    }

    pub(crate) fn record_renewed(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_renewals_total").increment(1);
    }

    pub(crate) fn record_lost(&self) {
        self.lost_leases.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_lost_leases_total").increment(1);
    }

    pub(crate) fn record_force_released(&self) {
        self.force_releases.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_force_releases_total").increment(1);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        counter!("tenure_lock_store_errors_total").increment(1);
    }

    pub(crate) fn snapshot(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.failed_acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            lost_leases: self.lost_leases.load(Ordering::Relaxed),
            force_releases: self.force_releases.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Register descriptions for every lock metric.
/// Call once at startup, after installing a metrics recorder.
pub fn describe_metrics() {
    describe_counter!(
        "tenure_lock_acquisitions_total",
        "Total number of granted lock acquisitions"
    );
    describe_counter!(
        "tenure_lock_failed_acquisitions_total",
        "Total number of acquire attempts denied by another holder"
    );
    describe_counter!("tenure_lock_releases_total", "Total number of lock releases");
    describe_counter!(
        "tenure_lock_renewals_total",
        "Total number of successful lease renewals"
    );
    describe_counter!(
        "tenure_lock_lost_leases_total",
        "Total number of leases lost before release"
    );
    describe_counter!(
        "tenure_lock_force_releases_total",
        "Total number of forced lock releases"
    );
    describe_counter!(
        "tenure_lock_store_errors_total",
        "Total number of failed store calls"
    );
}
