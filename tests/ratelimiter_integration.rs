//! End-to-end rate limiter behavior against the in-process store.

use gatehouse_core::{MemoryStore, SharedStore};
use gatehouse_ratelimiter::{RateLimitAlgorithm, RateLimitConfig, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

fn store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn token_bucket_burst_then_steady_refill() {
    let limiter = RateLimiter::new(
        store(),
        RateLimitConfig::builder()
            .algorithm(RateLimitAlgorithm::TokenBucket)
            .requests_per_window(5)
            .window_seconds(5)
            .burst_size(5)
            .refill_rate(1.0)
            .build(),
    );

    // The full burst is admitted immediately.
    for _ in 0..5 {
        assert!(limiter.check(Some("u"), None, None).await.allowed);
    }
    // The sixth is denied with a one-second hint.
    let denied = limiter.check(Some("u"), None, None).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(1));

    // One second later exactly one token has refilled.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(limiter.check(Some("u"), None, None).await.allowed);
    assert!(!limiter.check(Some("u"), None, None).await.allowed);
}

#[tokio::test]
async fn sliding_window_recovers_as_entries_age_out() {
    let limiter = RateLimiter::new(
        store(),
        RateLimitConfig::builder()
            .algorithm(RateLimitAlgorithm::SlidingWindow)
            .requests_per_window(3)
            .window_seconds(1)
            .build(),
    );

    for _ in 0..3 {
        assert!(limiter.check(Some("u"), None, None).await.allowed);
    }
    let denied = limiter.check(Some("u"), None, None).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(1));

    // Once the window slides past the oldest entries, capacity returns.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(limiter.check(Some("u"), None, None).await.allowed);
}

#[tokio::test]
async fn allowed_checks_never_exceed_the_limit() {
    let limiter = Arc::new(RateLimiter::new(
        store(),
        RateLimitConfig::builder()
            .requests_per_window(10)
            .window_seconds(60)
            .build(),
    ));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.check(Some("shared"), None, None).await.allowed
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
}

#[tokio::test]
async fn two_limiters_share_one_budget_through_the_store() {
    let store = store();
    let config = RateLimitConfig::builder()
        .requests_per_window(3)
        .window_seconds(60)
        .build();
    let first = RateLimiter::new(Arc::clone(&store), config.clone());
    let second = RateLimiter::new(store, config);

    // Interleaved checks from two "processes" spend the same budget.
    assert!(first.check(Some("u"), None, Some("/api")).await.allowed);
    assert!(second.check(Some("u"), None, Some("/api")).await.allowed);
    assert!(first.check(Some("u"), None, Some("/api")).await.allowed);
    assert!(!second.check(Some("u"), None, Some("/api")).await.allowed);
    assert!(!first.check(Some("u"), None, Some("/api")).await.allowed);
}

#[tokio::test]
async fn scopes_partition_budgets() {
    let limiter = RateLimiter::new(
        store(),
        RateLimitConfig::builder()
            .requests_per_window(1)
            .window_seconds(60)
            .scope(gatehouse_ratelimiter::RateLimitScope::Combined)
            .build(),
    );

    // Same user from two addresses: combined scope gives each its own
    // budget.
    assert!(limiter.check(Some("u"), Some("10.0.0.1"), None).await.allowed);
    assert!(limiter.check(Some("u"), Some("10.0.0.2"), None).await.allowed);
    assert!(!limiter.check(Some("u"), Some("10.0.0.1"), None).await.allowed);
}
