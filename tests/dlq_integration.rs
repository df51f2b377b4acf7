//! DLQ retry scheduling, poisoning, and deduplication end to end.

use async_trait::async_trait;
use gatehouse_core::{MemoryStore, SharedStore};
use gatehouse_dlq::{
    DeadLetterQueue, Deduplicator, MessageStatus, RetryConfig, RetryHandler, RetryStrategy,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct FailingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl RetryHandler for FailingHandler {
    async fn retry(&self, _: &str, _: &Value, _: &Value) -> Result<bool, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("still broken".to_string())
    }
}

fn store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn exponential_backoff_then_poison_after_threshold() {
    // Scaled-down rendition of the canonical backoff scenario: delays
    // double from the initial value and the fourth failure quarantines.
    let config = RetryConfig::builder()
        .strategy(RetryStrategy::ExponentialBackoff)
        .initial_delay(Duration::from_millis(50))
        .max_delay(Duration::from_secs(60))
        .backoff_multiplier(2.0)
        .max_retries(4)
        .poison_threshold(4)
        .build();
    let dlq = DeadLetterQueue::new(store(), config);
    let handler = Arc::new(FailingHandler {
        calls: AtomicUsize::new(0),
    });
    dlq.register_handler("orders", Arc::clone(&handler) as Arc<dyn RetryHandler>);

    let message = dlq
        .enqueue("orders", "orders", json!({"order": 1}), "boom", json!({}))
        .await
        .unwrap()
        .unwrap();

    // Initial schedule: one initial-delay out.
    let first_delta = message.next_retry_at_ms.unwrap() - message.created_at_ms;
    assert_eq!(first_delta, 50);

    let mut observed_deltas = Vec::new();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(450)).await;
        dlq.process_batch("orders").await.unwrap();
        let stored = dlq
            .message_status("orders", &message.id)
            .await
            .unwrap()
            .unwrap();
        if let Some(next) = stored.next_retry_at_ms {
            observed_deltas.push(next.saturating_sub(stored.updated_at_ms));
        }
    }

    // Doubling schedule, then quarantine.
    assert_eq!(observed_deltas.len(), 3);
    for (delta, expected) in observed_deltas.iter().zip([100u64, 200, 400]) {
        assert!(
            (*delta as i64 - expected as i64).abs() <= 5,
            "delta {delta} not near {expected}"
        );
    }

    let stored = dlq
        .message_status("orders", &message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MessageStatus::Poison);
    assert_eq!(stored.retry_count, 4);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 4);

    // Poison is terminal: further batches never offer it again.
    tokio::time::sleep(Duration::from_millis(500)).await;
    dlq.process_batch("orders").await.unwrap();
    assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn due_messages_are_offered_within_one_batch_cycle() {
    struct Succeeding {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RetryHandler for Succeeding {
        async fn retry(&self, _: &str, _: &Value, _: &Value) -> Result<bool, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    let config = RetryConfig::builder()
        .strategy(RetryStrategy::Immediate)
        .batch_size(10)
        .build();
    let dlq = DeadLetterQueue::new(store(), config);
    let handler = Arc::new(Succeeding {
        calls: AtomicUsize::new(0),
    });
    dlq.register_handler("orders", Arc::clone(&handler) as Arc<dyn RetryHandler>);

    for n in 0..5 {
        dlq.enqueue("orders", "orders", json!({ "n": n }), "boom", json!({}))
            .await
            .unwrap();
    }

    let result = dlq.process_batch("orders").await.unwrap();
    assert_eq!(result.processed, 5);
    assert_eq!(result.succeeded, 5);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn canonically_equal_payloads_share_a_hash() {
    let shuffled = json!({"b": [3, 1, 2], "a": {"y": 1, "x": 2}});
    let ordered = json!({"a": {"x": 2, "y": 1}, "b": [1, 2, 3]});
    assert_eq!(
        Deduplicator::content_hash(&shuffled, None, None),
        Deduplicator::content_hash(&ordered, None, None)
    );

    let dlq = DeadLetterQueue::new(store(), RetryConfig::builder().build());
    assert!(dlq
        .enqueue("q", "q", shuffled, "boom", json!({}))
        .await
        .unwrap()
        .is_some());
    // The reordered twin is a duplicate inside the window.
    assert!(dlq
        .enqueue("q", "q", ordered, "other", json!({}))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn requeue_beats_the_schedule() {
    struct Succeeding;

    #[async_trait]
    impl RetryHandler for Succeeding {
        async fn retry(&self, _: &str, _: &Value, _: &Value) -> Result<bool, String> {
            Ok(true)
        }
    }

    let config = RetryConfig::builder()
        .strategy(RetryStrategy::FixedDelay)
        .initial_delay(Duration::from_secs(3600))
        .max_delay(Duration::from_secs(3600))
        .build();
    let dlq = DeadLetterQueue::new(store(), config);
    dlq.register_handler("orders", Arc::new(Succeeding) as Arc<dyn RetryHandler>);

    let message = dlq
        .enqueue("orders", "orders", json!({"n": 1}), "boom", json!({}))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(dlq.process_batch("orders").await.unwrap().processed, 0);

    dlq.requeue("orders", &message.id).await.unwrap();
    let result = dlq.process_batch("orders").await.unwrap();
    assert_eq!(result.succeeded, 1);

    let stored = dlq
        .message_status("orders", &message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MessageStatus::Completed);
}
