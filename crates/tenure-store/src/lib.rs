//! Tenure Store - the lock coordinator protocol
//!
//! A lock record lives in the shared store under one key: a map from owner
//! token to reentrancy count, with one TTL on the whole key. This crate
//! provides:
//! - `LockCoordinator`: the five atomic operations on that record
//! - `MemoryCoordinator`: a process-local coordinator for tests and
//!   single-node use
//! - `RedisCoordinator` (feature `redis-backend`): Lua scripts over a Redis hash

pub mod coordinator;
pub mod error;
pub mod memory;
pub mod model;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use coordinator::LockCoordinator;
pub use error::{Result, StoreError};
pub use memory::MemoryCoordinator;
pub use model::{AcquireOutcome, LockSnapshot, ReleaseOutcome};
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisCoordinator;
