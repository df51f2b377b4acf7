//! Dead-letter queue.
//!
//! Accepts messages that downstream processing failed on, persists them in
//! the shared store, retries them on a backoff schedule through registered
//! handlers, quarantines poison messages, and deduplicates semantically
//! equal payloads within a time window.
//!
//! Storage layout per queue: the full message by id, a sorted set by
//! insertion time for ordered listing and cleanup, a sorted set by
//! `next_retry_at` for retry scheduling, and one set per status for O(1)
//! counts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatehouse_core::MemoryStore;
//! use gatehouse_dlq::{DeadLetterQueue, RetryConfig};
//!
//! # async fn example() {
//! let dlq = DeadLetterQueue::new(Arc::new(MemoryStore::new()), RetryConfig::builder().build());
//! dlq.enqueue(
//!     "default",
//!     "orders",
//!     serde_json::json!({"order_id": 7}),
//!     "connection refused",
//!     serde_json::json!({}),
//! )
//! .await
//! .unwrap();
//! # }
//! ```

mod config;
mod dedup;
mod error;
mod events;
mod message;
mod poison;
mod queue;
mod store;

pub use config::{RetryConfig, RetryConfigBuilder, RetryStrategy};
pub use dedup::Deduplicator;
pub use error::DlqError;
pub use events::DlqEvent;
pub use message::{DlqMessage, ErrorRecord, MessageStatus};
pub use poison::PoisonDetector;
pub use queue::{BatchResult, DeadLetterQueue, QueueStats, RetryHandler};
pub use store::MessageStore;
