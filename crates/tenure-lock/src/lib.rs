//! Tenure Lock - reentrant lease locks for distributed processes
//!
//! This crate provides:
//! - `LockRegistry`: process-wide get-or-create cache of lock handles that
//!   owns the shared renewal scheduler
//! - `LockHandle`: reentrant lock bound to one name and owner token, with
//!   non-blocking, deadline-bounded and cancellable acquisition
//! - Watchdog renewal of held leases every third of the lease
//! - Lock statistics mirrored to the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tenure_common::LockConfig;
//! use tenure_lock::LockRegistry;
//! use tenure_store::MemoryCoordinator;
//!
//! # async fn example() -> Result<(), tenure_lock::LockError> {
//! let registry = LockRegistry::new(Arc::new(MemoryCoordinator::new()), LockConfig::default())?;
//! let lock = registry.get_lock("orders")?;
//!
//! if lock.try_lock_for(Duration::from_secs(1), Duration::from_secs(10)).await? {
//!     // ... critical section ...
//!     lock.unlock().await;
//! }
//!
//! registry.destroy();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod registry;
pub mod stats;
pub mod token;
pub mod watchdog;

pub use error::{LockError, Result};
pub use handle::LockHandle;
pub use registry::LockRegistry;
pub use stats::{LockStats, describe_metrics};
pub use token::OwnerToken;
pub use watchdog::{RenewalScheduler, RenewalVerdict};

pub use tenure_store::{AcquireOutcome, LockSnapshot, ReleaseOutcome};
pub use tokio_util::sync::CancellationToken;
