//! Lock error types
//!
//! Store failures inside lock calls are logged and degraded to "not held";
//! these variants cover what a caller must see.

use tenure_common::ConfigError;
use tenure_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock wait interrupted")]
    Interrupted,

    #[error("lock registry has been destroyed")]
    RegistryDestroyed,

    #[error("renewal scheduler has been shut down")]
    SchedulerShutdown,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(LockError::Interrupted.to_string(), "lock wait interrupted");
        assert_eq!(
            LockError::RegistryDestroyed.to_string(),
            "lock registry has been destroyed"
        );

        let err: LockError = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(err.to_string(), "store unavailable: down");
    }
}
