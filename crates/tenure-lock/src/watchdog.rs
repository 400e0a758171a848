//! Lease renewal scheduler
//!
//! One scheduler is shared by every handle of a registry. Each held lease
//! gets a renewal loop on the captured tokio runtime, tracked under a key
//! (lock key plus owner token). Scheduling a key again replaces its loop, and
//! every loop's cancellation token is a child of the scheduler's root token,
//! so `shutdown` stops them all at once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{LockError, Result};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What a renewal loop does after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalVerdict {
    Continue,
    Stop,
}

/// Work executed on every tick
pub type RenewalJob = Arc<dyn Fn() -> BoxFuture<'static, RenewalVerdict> + Send + Sync>;

struct RenewalTask {
    id: u64,
    cancel: CancellationToken,
}

struct SchedulerInner {
    runtime: Handle,
    tasks: DashMap<String, RenewalTask>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Clone)]
pub struct RenewalScheduler {
    inner: Arc<SchedulerInner>,
}

impl RenewalScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                runtime,
                tasks: DashMap::new(),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Scheduler bound to the runtime of the calling context
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| LockError::NoRuntime(e.to_string()))?;
        Ok(Self::new(runtime))
    }

    /// Run `job` every `interval` under `key`, replacing any loop already
    /// registered for that key. The first tick fires one interval from now.
    pub fn schedule(&self, key: String, interval: Duration, job: RenewalJob) -> Result<()> {
        if self.is_shutdown() {
            return Err(LockError::SchedulerShutdown);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let interval = interval.max(MIN_INTERVAL);

        if let Some(previous) = self.inner.tasks.insert(
            key.clone(),
            RenewalTask {
                id,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        debug!(key = %key, interval_ms = interval.as_millis() as u64, "Scheduled lease renewal");
        self.inner.runtime.spawn(run_renewal(
            Arc::downgrade(&self.inner),
            key,
            id,
            interval,
            cancel,
            job,
        ));
        Ok(())
    }

    /// Stop the loop registered under `key`. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.inner.tasks.remove(key) {
            Some((_, task)) => {
                task.cancel.cancel();
                debug!(key = %key, "Cancelled lease renewal");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.inner.tasks.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Cancel every loop and refuse new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.clear();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Run a one-off store call on the scheduler's runtime.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.runtime.spawn(future)
    }
}

async fn run_renewal(
    scheduler: Weak<SchedulerInner>,
    key: String,
    id: u64,
    interval: Duration,
    cancel: CancellationToken,
    job: RenewalJob,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let verdict = tokio::select! {
                    _ = cancel.cancelled() => break,
                    verdict = job() => verdict,
                };
                if verdict == RenewalVerdict::Stop {
                    break;
                }
            }
        }
    }

    // A replacement loop may already own the key
    if let Some(inner) = scheduler.upgrade() {
        inner.tasks.remove_if(&key, |_, task| task.id == id);
    }
    trace!(key = %key, id, "Lease renewal loop exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    use super::*;

    fn counting_job(counter: Arc<AtomicUsize>, stop_after: usize) -> RenewalJob {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                let ticks = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if ticks >= stop_after {
                    RenewalVerdict::Stop
                } else {
                    RenewalVerdict::Continue
                }
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let scheduler = RenewalScheduler::current().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(
                "k".to_string(),
                Duration::from_millis(100),
                counting_job(ticks.clone(), 3),
            )
            .unwrap();
        assert!(scheduler.is_scheduled("k"));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_scheduled("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let scheduler = RenewalScheduler::current().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(
                "k".to_string(),
                Duration::from_millis(100),
                counting_job(ticks.clone(), usize::MAX),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(scheduler.cancel("k"));
        assert!(!scheduler.cancel("k"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_loop() {
        let scheduler = RenewalScheduler::current().unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(
                "k".to_string(),
                Duration::from_millis(100),
                counting_job(first.clone(), usize::MAX),
            )
            .unwrap();
        scheduler
            .schedule(
                "k".to_string(),
                Duration::from_millis(100),
                counting_job(second.clone(), usize::MAX),
            )
            .unwrap();
        assert_eq!(scheduler.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_scheduled("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_and_rejects_new() {
        let scheduler = RenewalScheduler::current().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            scheduler
                .schedule(
                    key.to_string(),
                    Duration::from_millis(100),
                    counting_job(ticks.clone(), usize::MAX),
                )
                .unwrap();
        }
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        assert_eq!(scheduler.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        let rejected = scheduler.schedule(
            "c".to_string(),
            Duration::from_millis(100),
            counting_job(ticks.clone(), 1),
        );
        assert!(matches!(rejected, Err(LockError::SchedulerShutdown)));
    }

    #[test]
    fn test_current_requires_runtime() {
        assert!(matches!(
            RenewalScheduler::current(),
            Err(LockError::NoRuntime(_))
        ));
    }
}
