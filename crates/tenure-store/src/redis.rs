//! Redis-backed lock coordinator
//!
//! A lock record is a Redis hash `{owner token -> hold count}` with a
//! millisecond expiry on the key. Each mutating operation is one Lua script,
//! so the ownership check and the write happen inside a single server-side
//! step. Scripts are sent with `EVALSHA` and fall back to `EVAL` on a cache
//! miss.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::coordinator::LockCoordinator;
use crate::error::{Result, StoreError};
use crate::model::{AcquireOutcome, LockSnapshot, ReleaseOutcome};

/// KEYS[1] = lock key, ARGV[1] = lease ms, ARGV[2] = owner token.
/// Returns `{1, hold_count}` when granted, `{0, pttl}` when denied.
const ACQUIRE_SCRIPT: &str = r#"
if redis.call('exists', KEYS[1]) == 0
    or redis.call('hexists', KEYS[1], ARGV[2]) == 1 then
    local count = redis.call('hincrby', KEYS[1], ARGV[2], 1)
    redis.call('pexpire', KEYS[1], ARGV[1])
    return {1, count}
end
return {0, redis.call('pttl', KEYS[1])}
"#;

/// KEYS[1] = lock key, ARGV[1] = lease ms, ARGV[2] = owner token.
/// Returns -1 when not the owner, the remaining count otherwise (0 = deleted).
const RELEASE_SCRIPT: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[2]) == 0 then
    return -1
end
local count = redis.call('hincrby', KEYS[1], ARGV[2], -1)
if count > 0 then
    redis.call('pexpire', KEYS[1], ARGV[1])
    return count
end
redis.call('del', KEYS[1])
return 0
"#;

/// KEYS[1] = lock key, ARGV[1] = lease ms, ARGV[2] = owner token.
const RENEW_SCRIPT: &str = r#"
if redis.call('hexists', KEYS[1], ARGV[2]) == 1 then
    redis.call('pexpire', KEYS[1], ARGV[1])
    return 1
end
return 0
"#;

/// KEYS[1] = lock key. Returns the number of deleted keys.
const FORCE_RELEASE_SCRIPT: &str = r#"
return redis.call('del', KEYS[1])
"#;

/// Coordinator backed by a Redis server.
///
/// Cheap to clone; clones share one reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisCoordinator {
    connection: ConnectionManager,
    acquire: Script,
    release: Script,
    renew: Script,
    force_release: Script,
}

impl RedisCoordinator {
    /// Connect to the server at `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected lock coordinator to redis");
        Ok(Self::with_connection(connection))
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
            force_release: Script::new(FORCE_RELEASE_SCRIPT),
        }
    }
}

fn lease_millis(lease: Duration) -> u64 {
    // PEXPIRE rejects 0; a zero lease becomes the shortest one Redis accepts
    (lease.as_millis() as u64).max(1)
}

/// PTTL reply as a duration; -2 (no key) and -1 (no expiry) map to zero
fn ttl_from_pttl(pttl: i64) -> Duration {
    Duration::from_millis(pttl.max(0) as u64)
}

#[async_trait]
impl LockCoordinator for RedisCoordinator {
    async fn acquire(&self, name: &str, owner: &str, lease: Duration) -> Result<AcquireOutcome> {
        let mut connection = self.connection.clone();
        let (granted, value): (i64, i64) = self
            .acquire
            .key(name)
            .arg(lease_millis(lease))
            .arg(owner)
            .invoke_async(&mut connection)
            .await?;

        match granted {
            1 => {
                let hold_count = u32::try_from(value).map_err(|_| {
                    StoreError::Protocol(format!("invalid hold count {} for {}", value, name))
                })?;
                Ok(AcquireOutcome::Granted { hold_count })
            }
            0 => Ok(AcquireOutcome::Denied {
                remaining_ttl: ttl_from_pttl(value),
            }),
            other => Err(StoreError::Protocol(format!(
                "unexpected acquire flag {} for {}",
                other, name
            ))),
        }
    }

    async fn release(&self, name: &str, owner: &str, lease: Duration) -> Result<ReleaseOutcome> {
        let mut connection = self.connection.clone();
        let remaining: i64 = self
            .release
            .key(name)
            .arg(lease_millis(lease))
            .arg(owner)
            .invoke_async(&mut connection)
            .await?;

        match remaining {
            -1 => Ok(ReleaseOutcome::NotOwner),
            0 => Ok(ReleaseOutcome::FullyReleased),
            n if n > 0 => Ok(ReleaseOutcome::Partial {
                remaining: n as u32,
            }),
            other => Err(StoreError::Protocol(format!(
                "unexpected release reply {} for {}",
                other, name
            ))),
        }
    }

    async fn renew(&self, name: &str, owner: &str, lease: Duration) -> Result<bool> {
        let mut connection = self.connection.clone();
        let renewed: i64 = self
            .renew
            .key(name)
            .arg(lease_millis(lease))
            .arg(owner)
            .invoke_async(&mut connection)
            .await?;
        Ok(renewed == 1)
    }

    async fn force_release(&self, name: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .force_release
            .key(name)
            .invoke_async(&mut connection)
            .await?;
        debug!(lock = %name, deleted, "Force release executed");
        Ok(deleted > 0)
    }

    async fn inspect(&self, name: &str) -> Result<LockSnapshot> {
        let mut connection = self.connection.clone();
        let (holders, pttl): (HashMap<String, i64>, i64) = ::redis::pipe()
            .atomic()
            .cmd("HGETALL")
            .arg(name)
            .cmd("PTTL")
            .arg(name)
            .query_async(&mut connection)
            .await?;

        let Some((owner, count)) = holders.into_iter().next() else {
            return Ok(LockSnapshot::unlocked());
        };

        Ok(LockSnapshot {
            held: true,
            ttl: Some(ttl_from_pttl(pttl)),
            owner: Some(owner),
            hold_count: count.max(0) as u32,
        })
    }
}
