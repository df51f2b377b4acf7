use crate::config::RetryConfig;
use crate::dedup::Deduplicator;
use crate::error::DlqError;
use crate::events::DlqEvent;
use crate::message::{epoch_ms, DlqMessage, MessageStatus};
use crate::poison::PoisonDetector;
use crate::store::MessageStore;
use async_trait::async_trait;
use gatehouse_core::{EventListener, EventListeners, SharedStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use uuid::Uuid;

/// Handler invoked to re-process a captured message.
///
/// Returns `Ok(true)` on success, `Ok(false)` on a clean failure, or an
/// error message; both failure shapes reschedule the message.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn retry(
        &self,
        original_queue: &str,
        content: &Value,
        metadata: &Value,
    ) -> Result<bool, String>;
}

/// Outcome of one retry batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchResult {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Statistics for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub queue_name: String,
    pub total_messages: u64,
    pub by_status: HashMap<MessageStatus, u64>,
    pub poison_rate: f64,
    pub handler_registered: bool,
}

/// The dead-letter queue facade.
///
/// Owns persistence, dedup, poison detection, and the background retry and
/// cleanup loops.
pub struct DeadLetterQueue {
    store: MessageStore,
    config: RetryConfig,
    dedup: Deduplicator,
    detector: PoisonDetector,
    handlers: RwLock<HashMap<String, Arc<dyn RetryHandler>>>,
    events: EventListeners<DlqEvent>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl DeadLetterQueue {
    pub fn new(store: SharedStore, config: RetryConfig) -> Self {
        Self {
            store: MessageStore::new(store, config.ttl),
            dedup: Deduplicator::new(config.dedup_window),
            detector: PoisonDetector::new(),
            config,
            handlers: RwLock::new(HashMap::new()),
            events: EventListeners::new(),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register an event listener. Call before `start`.
    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: EventListener<DlqEvent> + 'static,
    {
        self.events.add(listener);
    }

    /// Register the retry handler for messages whose `original_queue`
    /// matches `queue`.
    pub fn register_handler(&self, queue: impl Into<String>, handler: Arc<dyn RetryHandler>) {
        let queue = queue.into();
        #[cfg(feature = "tracing")]
        tracing::info!(queue = %queue, "registered DLQ retry handler");
        self.handlers.write().unwrap().insert(queue, handler);
    }

    /// Capture a failed message. Returns `None` when the payload is a
    /// duplicate inside the dedup window.
    pub async fn enqueue(
        &self,
        queue: &str,
        original_queue: &str,
        content: Value,
        error_message: &str,
        metadata: Value,
    ) -> Result<Option<DlqMessage>, DlqError> {
        let content_hash = Deduplicator::content_hash(&content, None, None);
        if self.dedup.check_and_record(&content_hash) {
            #[cfg(feature = "metrics")]
            metrics::counter!("dlq_duplicates_rejected_total", "queue" => queue.to_string())
                .increment(1);
            self.events.emit(&DlqEvent::DuplicateRejected {
                queue: queue.to_string(),
                content_hash,
                timestamp: Instant::now(),
            });
            return Ok(None);
        }

        let mut message = DlqMessage::new(
            Uuid::new_v4().to_string(),
            queue,
            original_queue,
            content,
            error_message,
            metadata,
        );
        message.content_hash = Some(content_hash);
        message.expired_at_ms = Some(message.created_at_ms + self.config.ttl.as_millis() as u64);
        message.next_retry_at_ms =
            Some(message.created_at_ms + self.config.delay_for(0).as_millis() as u64);

        if let Some(reason) = self
            .detector
            .inspect(&message, self.config.poison_threshold)
        {
            message.mark_poison();
            message.add_error(format!("poison: {reason}"));
            self.events.emit(&DlqEvent::MessagePoisoned {
                queue: queue.to_string(),
                id: message.id.clone(),
                reason,
                timestamp: Instant::now(),
            });
        }

        self.store.insert(&message).await?;

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "dlq_messages_total",
            "queue" => queue.to_string(),
            "status" => message.status.as_str()
        )
        .increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(queue, id = %message.id, status = message.status.as_str(), "message enqueued to DLQ");

        self.events.emit(&DlqEvent::MessageEnqueued {
            queue: queue.to_string(),
            id: message.id.clone(),
            timestamp: Instant::now(),
        });

        Ok(Some(message))
    }

    /// Retry one message through its queue's registered handler.
    pub async fn retry(&self, queue: &str, id: &str) -> Result<bool, DlqError> {
        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(queue)
            .cloned()
            .ok_or_else(|| DlqError::NoHandler {
                queue: queue.to_string(),
            })?;

        let message = self
            .store
            .get(queue, id)
            .await?
            .ok_or_else(|| DlqError::NotFound {
                queue: queue.to_string(),
                id: id.to_string(),
            })?;
        self.retry_with_handler(message, handler).await
    }

    /// Pull one batch of due messages for `queue` and run them through the
    /// handler.
    pub async fn process_batch(&self, queue: &str) -> Result<BatchResult, DlqError> {
        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(queue)
            .cloned()
            .ok_or_else(|| DlqError::NoHandler {
                queue: queue.to_string(),
            })?;

        let ready = self
            .store
            .ready_for_retry(queue, epoch_ms(), self.config.batch_size)
            .await?;

        let mut result = BatchResult::default();
        for message in ready {
            result.processed += 1;
            match self.retry_with_handler(message, Arc::clone(&handler)).await {
                Ok(true) => result.succeeded += 1,
                Ok(false) => result.failed += 1,
                Err(DlqError::Poisoned { .. }) => result.failed += 1,
                Err(other) => return Err(other),
            }
        }

        #[cfg(feature = "metrics")]
        if result.processed > 0 {
            metrics::counter!("dlq_retries_processed_total", "queue" => queue.to_string())
                .increment(result.processed as u64);
            metrics::counter!("dlq_retries_succeeded_total", "queue" => queue.to_string())
                .increment(result.succeeded as u64);
            metrics::counter!("dlq_retries_failed_total", "queue" => queue.to_string())
                .increment(result.failed as u64);
        }

        Ok(result)
    }

    async fn retry_with_handler(
        &self,
        mut message: DlqMessage,
        handler: Arc<dyn RetryHandler>,
    ) -> Result<bool, DlqError> {
        if message.status == MessageStatus::Poison {
            return Err(DlqError::Poisoned {
                queue: message.queue_name.clone(),
                id: message.id.clone(),
            });
        }
        if message.retry_count >= self.config.max_retries {
            self.quarantine(
                &mut message,
                format!("exceeded max retries ({})", self.config.max_retries),
            )
            .await?;
            return Ok(false);
        }

        message.status = MessageStatus::Processing;
        self.store.update(&message).await?;

        let outcome = handler
            .retry(&message.original_queue, &message.content, &message.metadata)
            .await;

        match outcome {
            Ok(true) => {
                message.status = MessageStatus::Completed;
                message.next_retry_at_ms = None;
                self.store.update(&message).await?;
                self.events.emit(&DlqEvent::RetrySucceeded {
                    queue: message.queue_name.clone(),
                    id: message.id.clone(),
                    timestamp: Instant::now(),
                });
                Ok(true)
            }
            Ok(false) => {
                self.reschedule(&mut message, "retry handler reported failure".to_string())
                    .await?;
                Ok(false)
            }
            Err(error) => {
                self.reschedule(&mut message, format!("retry handler error: {error}"))
                    .await?;
                Ok(false)
            }
        }
    }

    async fn reschedule(&self, message: &mut DlqMessage, error: String) -> Result<(), DlqError> {
        message.increment_retry();
        message.add_error(error);

        if message.retry_count >= self.config.poison_threshold {
            self.quarantine(
                message,
                format!("poisoned after {} retries", message.retry_count),
            )
            .await?;
            return Ok(());
        }

        message.status = MessageStatus::Failed;
        message.next_retry_at_ms =
            Some(epoch_ms() + self.config.delay_for(message.retry_count).as_millis() as u64);
        self.store.update(message).await?;

        self.events.emit(&DlqEvent::RetryFailed {
            queue: message.queue_name.clone(),
            id: message.id.clone(),
            retry_count: message.retry_count,
            timestamp: Instant::now(),
        });
        Ok(())
    }

    async fn quarantine(&self, message: &mut DlqMessage, reason: String) -> Result<(), DlqError> {
        message.mark_poison();
        message.add_error(reason.clone());
        self.store.update(message).await?;

        #[cfg(feature = "tracing")]
        tracing::error!(queue = %message.queue_name, id = %message.id, %reason, "message quarantined as poison");

        self.events.emit(&DlqEvent::MessagePoisoned {
            queue: message.queue_name.clone(),
            id: message.id.clone(),
            reason,
            timestamp: Instant::now(),
        });
        Ok(())
    }

    /// Reset a message for immediate retry.
    pub async fn requeue(&self, queue: &str, id: &str) -> Result<(), DlqError> {
        let mut message = self
            .store
            .get(queue, id)
            .await?
            .ok_or_else(|| DlqError::NotFound {
                queue: queue.to_string(),
                id: id.to_string(),
            })?;
        message.status = MessageStatus::Pending;
        message.next_retry_at_ms = Some(epoch_ms());
        self.store.update(&message).await?;
        Ok(())
    }

    /// Force-quarantine a message.
    pub async fn mark_poison(&self, queue: &str, id: &str, reason: &str) -> Result<(), DlqError> {
        let mut message = self
            .store
            .get(queue, id)
            .await?
            .ok_or_else(|| DlqError::NotFound {
                queue: queue.to_string(),
                id: id.to_string(),
            })?;
        self.quarantine(&mut message, format!("marked poison: {reason}"))
            .await
    }

    /// Fetch one message.
    pub async fn message_status(&self, queue: &str, id: &str) -> Result<Option<DlqMessage>, DlqError> {
        Ok(self.store.get(queue, id).await?)
    }

    /// List messages, optionally by status.
    pub async fn list_messages(
        &self,
        queue: &str,
        status: Option<MessageStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqMessage>, DlqError> {
        Ok(self.store.list(queue, status, limit, offset).await?)
    }

    /// Mark overdue messages expired and delete those past twice the TTL.
    pub async fn run_cleanup(&self) -> Result<(), DlqError> {
        let now = epoch_ms();
        for queue in self.known_queues() {
            for mut message in self.store.expired(&queue, now, 100).await? {
                message.status = MessageStatus::Expired;
                message.next_retry_at_ms = None;
                self.store.update(&message).await?;

                #[cfg(feature = "metrics")]
                metrics::counter!("dlq_expired_messages_total", "queue" => queue.clone())
                    .increment(1);

                self.events.emit(&DlqEvent::MessageExpired {
                    queue: queue.clone(),
                    id: message.id.clone(),
                    timestamp: Instant::now(),
                });
            }

            let cutoff = now.saturating_sub(2 * self.config.ttl.as_millis() as u64);
            let deleted = self.store.cleanup_older_than(&queue, cutoff).await?;
            if deleted > 0 {
                #[cfg(feature = "tracing")]
                tracing::info!(queue = %queue, deleted, "cleaned up old DLQ messages");
            }
        }
        self.detector.clear();
        Ok(())
    }

    /// Start the background retry and cleanup loops.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            #[cfg(feature = "tracing")]
            tracing::warn!("DLQ already running");
            return;
        }

        let mut tasks = self.tasks.lock().unwrap();

        let dlq = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while dlq.running.load(Ordering::SeqCst) {
                for queue in dlq.handler_queues() {
                    if let Err(_err) = dlq.process_batch(&queue).await {
                        #[cfg(feature = "tracing")]
                        tracing::error!(queue = %queue, error = %_err, "DLQ retry batch failed");
                    }
                }
                tokio::time::sleep(dlq.config.batch_timeout).await;
            }
        }));

        let dlq = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while dlq.running.load(Ordering::SeqCst) {
                if let Err(_err) = dlq.run_cleanup().await {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %_err, "DLQ cleanup pass failed");
                }
                tokio::time::sleep(dlq.config.cleanup_interval).await;
            }
        }));
    }

    /// Stop the background loops.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Statistics for one queue.
    pub async fn queue_stats(&self, queue: &str) -> Result<QueueStats, DlqError> {
        let by_status = self.store.count_by_status(queue).await?;
        let total: u64 = by_status.values().sum();
        let poison = by_status
            .get(&MessageStatus::Poison)
            .copied()
            .unwrap_or_default();
        Ok(QueueStats {
            queue_name: queue.to_string(),
            total_messages: total,
            poison_rate: if total == 0 {
                0.0
            } else {
                poison as f64 / total as f64
            },
            by_status,
            handler_registered: self.handlers.read().unwrap().contains_key(queue),
        })
    }

    /// Statistics for every known queue.
    pub async fn stats(&self) -> Result<HashMap<String, QueueStats>, DlqError> {
        let mut stats = HashMap::new();
        for queue in self.known_queues() {
            stats.insert(queue.clone(), self.queue_stats(&queue).await?);
        }
        Ok(stats)
    }

    fn handler_queues(&self) -> Vec<String> {
        self.handlers.read().unwrap().keys().cloned().collect()
    }

    fn known_queues(&self) -> Vec<String> {
        let mut queues = self.handler_queues();
        if !queues.iter().any(|queue| queue == "default") {
            queues.push("default".to_string());
        }
        queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryStrategy;
    use gatehouse_core::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct ScriptedHandler {
        calls: AtomicUsize,
        outcomes: Vec<Result<bool, String>>,
    }

    impl ScriptedHandler {
        fn new(outcomes: Vec<Result<bool, String>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcomes,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RetryHandler for ScriptedHandler {
        async fn retry(&self, _: &str, _: &Value, _: &Value) -> Result<bool, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .get(call)
                .cloned()
                .unwrap_or(Ok(true))
        }
    }

    fn dlq(config: RetryConfig) -> DeadLetterQueue {
        DeadLetterQueue::new(Arc::new(MemoryStore::new()), config)
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::builder()
            .strategy(RetryStrategy::Immediate)
            .max_retries(4)
            .poison_threshold(4)
            .build()
    }

    #[tokio::test]
    async fn enqueue_schedules_and_hashes() {
        let dlq = dlq(fast_config());
        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
        assert!(message.content_hash.is_some());
        assert!(message.next_retry_at_ms.is_some());
        assert!(message.expired_at_ms.is_some());
    }

    #[tokio::test]
    async fn duplicates_inside_window_are_rejected() {
        let dlq = dlq(fast_config());
        let first = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = dlq
            .enqueue("default", "orders", json!({"id": 1}), "other error", json!({}))
            .await
            .unwrap();
        assert!(second.is_none());

        // Different payloads are not duplicates.
        let third = dlq
            .enqueue("default", "orders", json!({"id": 2}), "boom", json!({}))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn retry_success_completes_the_message() {
        let dlq = dlq(fast_config());
        let handler = ScriptedHandler::new(vec![Ok(true)]);
        dlq.register_handler("default", handler.clone() as Arc<dyn RetryHandler>);

        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();

        let result = dlq.process_batch("default").await.unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.succeeded, 1);
        assert_eq!(handler.calls(), 1);

        let stored = dlq.message_status("default", &message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Completed);
        assert_eq!(stored.next_retry_at_ms, None);
    }

    #[tokio::test]
    async fn failures_reschedule_with_backoff_then_poison() {
        let config = RetryConfig::builder()
            .strategy(RetryStrategy::ExponentialBackoff)
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(60))
            .backoff_multiplier(2.0)
            .max_retries(4)
            .poison_threshold(4)
            .build();
        let dlq = dlq(config);
        let handler = ScriptedHandler::new(vec![
            Err("fail".to_string()),
            Err("fail".to_string()),
            Err("fail".to_string()),
            Err("fail".to_string()),
        ]);
        dlq.register_handler("default", handler.clone() as Arc<dyn RetryHandler>);

        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();

        // First schedule uses the initial delay.
        let delta0 = message.next_retry_at_ms.unwrap() - message.created_at_ms;
        assert_eq!(delta0, 10);

        let mut deltas = Vec::new();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            dlq.process_batch("default").await.unwrap();
            let stored = dlq
                .message_status("default", &message.id)
                .await
                .unwrap()
                .unwrap();
            if let Some(next) = stored.next_retry_at_ms {
                deltas.push(next.saturating_sub(stored.updated_at_ms));
            }
        }

        // Rescheduled delays double: 20ms, 40ms, 80ms; the 4th failure
        // quarantines instead of rescheduling. Allow a couple of ms of
        // clock skew between the update stamp and the schedule stamp.
        assert_eq!(deltas.len(), 3);
        for (delta, expected) in deltas.iter().zip([20u64, 40, 80]) {
            assert!(
                (*delta as i64 - expected as i64).abs() <= 5,
                "delta {delta} not near {expected}"
            );
        }

        let stored = dlq
            .message_status("default", &message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Poison);
        assert_eq!(stored.retry_count, 4);
        assert_eq!(handler.calls(), 4);

        // Poison is terminal: nothing further is offered to the handler.
        let result = dlq.process_batch("default").await.unwrap();
        assert_eq!(result.processed, 0);
        assert_eq!(handler.calls(), 4);
    }

    #[tokio::test]
    async fn handler_false_counts_as_failure() {
        let dlq = dlq(fast_config());
        let handler = ScriptedHandler::new(vec![Ok(false)]);
        dlq.register_handler("default", handler as Arc<dyn RetryHandler>);

        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();
        dlq.process_batch("default").await.unwrap();

        let stored = dlq
            .message_status("default", &message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_history.len(), 1);
    }

    #[tokio::test]
    async fn requeue_resets_for_immediate_retry() {
        let config = RetryConfig::builder()
            .strategy(RetryStrategy::FixedDelay)
            .initial_delay(Duration::from_secs(3600))
            .max_delay(Duration::from_secs(3600))
            .build();
        let dlq = dlq(config);
        let handler = ScriptedHandler::new(vec![Ok(true)]);
        dlq.register_handler("default", handler.clone() as Arc<dyn RetryHandler>);

        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();

        // Scheduled an hour out: not picked up.
        let result = dlq.process_batch("default").await.unwrap();
        assert_eq!(result.processed, 0);

        dlq.requeue("default", &message.id).await.unwrap();
        let result = dlq.process_batch("default").await.unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.succeeded, 1);
    }

    #[tokio::test]
    async fn manual_poison_blocks_retry() {
        let dlq = dlq(fast_config());
        let handler = ScriptedHandler::new(vec![]);
        dlq.register_handler("default", handler as Arc<dyn RetryHandler>);

        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();
        dlq.mark_poison("default", &message.id, "operator decision")
            .await
            .unwrap();

        let result = dlq.retry("default", &message.id).await;
        assert!(matches!(result, Err(DlqError::Poisoned { .. })));
    }

    #[tokio::test]
    async fn poison_payload_is_quarantined_at_enqueue() {
        let dlq = dlq(fast_config());
        let message = dlq
            .enqueue(
                "default",
                "orders",
                json!("not an object"),
                "boom",
                json!({}),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, MessageStatus::Poison);
    }

    #[tokio::test]
    async fn cleanup_expires_and_deletes() {
        let config = RetryConfig::builder()
            .strategy(RetryStrategy::Immediate)
            .ttl(Duration::from_millis(30))
            .build();
        let dlq = dlq(config);
        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        dlq.run_cleanup().await.unwrap();
        let stored = dlq
            .message_status("default", &message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Expired);

        // Past twice the TTL the message is deleted outright.
        tokio::time::sleep(Duration::from_millis(40)).await;
        dlq.run_cleanup().await.unwrap();
        assert!(dlq
            .message_status("default", &message.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn background_loop_drains_due_messages() {
        let config = RetryConfig::builder()
            .strategy(RetryStrategy::Immediate)
            .batch_timeout(Duration::from_millis(10))
            .cleanup_interval(Duration::from_secs(3600))
            .build();
        let dlq = Arc::new(dlq(config));
        let handler = ScriptedHandler::new(vec![Ok(true)]);
        dlq.register_handler("default", handler.clone() as Arc<dyn RetryHandler>);

        let message = dlq
            .enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap()
            .unwrap();

        dlq.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        dlq.stop();

        let stored = dlq
            .message_status("default", &message.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MessageStatus::Completed);
        assert!(!dlq.is_running());
    }

    #[tokio::test]
    async fn stats_break_down_by_status() {
        let dlq = dlq(fast_config());
        dlq.enqueue("default", "orders", json!({"id": 1}), "boom", json!({}))
            .await
            .unwrap();
        dlq.enqueue("default", "orders", json!("poison"), "boom", json!({}))
            .await
            .unwrap();

        let stats = dlq.queue_stats("default").await.unwrap();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.by_status[&MessageStatus::Pending], 1);
        assert_eq!(stats.by_status[&MessageStatus::Poison], 1);
        assert!((stats.poison_rate - 0.5).abs() < f64::EPSILON);
        assert!(!stats.handler_registered);
    }
}
