//! Redis Coordinator Integration Tests
//!
//! These tests require a running Redis server.
//!
//! To run these tests:
//! 1. Start Redis (e.g. `docker run -p 6379:6379 redis:7`)
//! 2. Optionally point `TENURE_REDIS_URL` at it
//! 3. Run: cargo test -p tenure-store --test redis_integration_test -- --ignored

#![cfg(feature = "redis-backend")]

use std::time::Duration;

use tenure_store::{AcquireOutcome, LockCoordinator, RedisCoordinator, ReleaseOutcome};

const LEASE: Duration = Duration::from_millis(300);

async fn connect() -> RedisCoordinator {
    let url =
        std::env::var("TENURE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisCoordinator::connect(&url).await.unwrap()
}

fn unique_key(test: &str) -> String {
    format!("tenure:test:{}:{}", test, std::process::id())
}

#[tokio::test]
#[ignore]
async fn test_redis_mutual_exclusion() {
    let store = connect().await;
    let key = unique_key("mutex");
    store.force_release(&key).await.unwrap();

    assert!(store.acquire(&key, "t1", LEASE).await.unwrap().is_granted());

    let denied = store.acquire(&key, "t2", LEASE).await.unwrap();
    let ttl = denied.remaining_ttl().unwrap();
    assert!(ttl > Duration::ZERO && ttl <= LEASE);

    assert_eq!(
        store.release(&key, "t1", LEASE).await.unwrap(),
        ReleaseOutcome::FullyReleased
    );
    assert!(store.acquire(&key, "t2", LEASE).await.unwrap().is_granted());
    store.force_release(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redis_reentrancy() {
    let store = connect().await;
    let key = unique_key("reentrant");
    store.force_release(&key).await.unwrap();

    store.acquire(&key, "t1", LEASE).await.unwrap();
    assert_eq!(
        store.acquire(&key, "t1", LEASE).await.unwrap(),
        AcquireOutcome::Granted { hold_count: 2 }
    );

    let snapshot = store.inspect(&key).await.unwrap();
    assert!(snapshot.is_owned_by("t1"));
    assert_eq!(snapshot.hold_count, 2);

    assert_eq!(
        store.release(&key, "t1", LEASE).await.unwrap(),
        ReleaseOutcome::Partial { remaining: 1 }
    );
    assert_eq!(
        store.release(&key, "t1", LEASE).await.unwrap(),
        ReleaseOutcome::FullyReleased
    );
    assert!(!store.inspect(&key).await.unwrap().held);
}

#[tokio::test]
#[ignore]
async fn test_redis_lease_expiry_and_renew() {
    let store = connect().await;
    let key = unique_key("expiry");
    store.force_release(&key).await.unwrap();

    store.acquire(&key, "t1", LEASE).await.unwrap();
    assert!(!store.renew(&key, "t2", LEASE).await.unwrap());
    assert!(store.renew(&key, "t1", LEASE).await.unwrap());

    tokio::time::sleep(LEASE + Duration::from_millis(100)).await;
    assert!(!store.inspect(&key).await.unwrap().held);
    assert!(!store.renew(&key, "t1", LEASE).await.unwrap());
    assert!(!store.force_release(&key).await.unwrap());
}
