//! Store error types

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "redis-backend")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("unexpected reply from store: {0}")]
    Protocol(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
