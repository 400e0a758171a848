//! Tenure Common - configuration, logging and shared constants
//!
//! This crate provides the pieces every Tenure component shares:
//! - `LockConfig`: lock defaults loaded from files and `TENURE_*` variables
//! - Logging bootstrap built on `tracing-subscriber`
//! - Common constants

pub mod config;
pub mod logging;

pub use config::{ConfigError, LockConfig, OwnerScope};
pub use logging::{LoggingConfig, LoggingGuard, init_logging};

/// Environment variable prefix for every Tenure setting
pub const ENV_PREFIX: &str = "TENURE";

/// Default lease applied when a lock is requested without one (30 seconds)
pub const DEFAULT_LEASE_MS: u64 = 30_000;

/// Default prefix prepended to lock names to form store keys
pub const DEFAULT_KEY_PREFIX: &str = "tenure:lock:";

/// Default pause between acquisition attempts of a blocking lock call
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 50;

/// Default store endpoint
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";
