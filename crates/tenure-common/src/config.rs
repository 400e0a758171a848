//! Lock configuration
//!
//! Settings are layered: built-in defaults, then an optional configuration
//! file (any format the `config` crate recognizes by extension), then
//! `TENURE_*` environment variables such as `TENURE_DEFAULT_LEASE_MS`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_KEY_PREFIX, DEFAULT_LEASE_MS, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_STORE_URL, ENV_PREFIX,
};

/// Smallest lease that still yields a non-zero watchdog interval
const MIN_RENEWABLE_LEASE_MS: u64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which identity counts as "the same owner" when a cached handle re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerScope {
    /// One owner token per handle; every task in the process shares it.
    #[default]
    Process,
    /// The handle token is combined with the current tokio task id, so tasks
    /// sharing a handle contend with each other.
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease used by handles created without an explicit one
    pub default_lease_ms: u64,
    /// Prefix prepended to every lock name to form the store key
    pub key_prefix: String,
    /// Keep held leases alive with a watchdog
    pub auto_renew: bool,
    /// Pause between attempts of a blocking acquisition
    pub retry_interval_ms: u64,
    pub owner_scope: OwnerScope,
    /// Endpoint of the shared store
    pub store_url: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: DEFAULT_LEASE_MS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            auto_renew: true,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            owner_scope: OwnerScope::Process,
            store_url: DEFAULT_STORE_URL.to_string(),
        }
    }
}

impl LockConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: LockConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_lease_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_lease_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.auto_renew && self.default_lease_ms < MIN_RENEWABLE_LEASE_MS {
            return Err(ConfigError::Invalid(format!(
                "default_lease_ms must be at least {} ms when auto_renew is enabled",
                MIN_RENEWABLE_LEASE_MS
            )));
        }
        Ok(())
    }

    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.default_lease_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Store key for a lock name
    pub fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }
}
