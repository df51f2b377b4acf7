use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// DLQ message status.
///
/// `Poison` is terminal: a message never leaves that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Retrying,
    Failed,
    Poison,
    Expired,
    Completed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Retrying => "retrying",
            MessageStatus::Failed => "failed",
            MessageStatus::Poison => "poison",
            MessageStatus::Expired => "expired",
            MessageStatus::Completed => "completed",
        }
    }

    pub const ALL: [MessageStatus; 7] = [
        MessageStatus::Pending,
        MessageStatus::Processing,
        MessageStatus::Retrying,
        MessageStatus::Failed,
        MessageStatus::Poison,
        MessageStatus::Expired,
        MessageStatus::Completed,
    ];
}

/// One entry in a message's append-only error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp_ms: u64,
    pub error: String,
    pub retry_count: u32,
}

/// A captured failure awaiting retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMessage {
    pub id: String,
    pub queue_name: String,
    pub original_queue: String,
    pub content: Value,
    pub error_message: String,
    pub status: MessageStatus,
    pub retry_count: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub next_retry_at_ms: Option<u64>,
    pub expired_at_ms: Option<u64>,
    pub metadata: Value,
    pub error_history: Vec<ErrorRecord>,
    pub content_hash: Option<String>,
}

impl DlqMessage {
    pub fn new(
        id: impl Into<String>,
        queue_name: impl Into<String>,
        original_queue: impl Into<String>,
        content: Value,
        error_message: impl Into<String>,
        metadata: Value,
    ) -> Self {
        let now = epoch_ms();
        Self {
            id: id.into(),
            queue_name: queue_name.into(),
            original_queue: original_queue.into(),
            content,
            error_message: error_message.into(),
            status: MessageStatus::Pending,
            retry_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
            next_retry_at_ms: None,
            expired_at_ms: None,
            metadata,
            error_history: Vec::new(),
            content_hash: None,
        }
    }

    /// Append to the error history and make this the current error.
    pub fn add_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.error_history.push(ErrorRecord {
            timestamp_ms: epoch_ms(),
            error: error.clone(),
            retry_count: self.retry_count,
        });
        self.error_message = error;
        self.updated_at_ms = epoch_ms();
    }

    /// `retry_count` only ever grows.
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
        self.updated_at_ms = epoch_ms();
    }

    pub fn mark_poison(&mut self) {
        self.status = MessageStatus::Poison;
        self.next_retry_at_ms = None;
        self.updated_at_ms = epoch_ms();
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expired_at_ms.is_some_and(|at| at <= now_ms)
    }
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_history_is_append_only() {
        let mut message = DlqMessage::new(
            "m1",
            "default",
            "orders",
            serde_json::json!({"a": 1}),
            "first",
            serde_json::json!({}),
        );
        message.add_error("second");
        message.increment_retry();
        message.add_error("third");

        assert_eq!(message.error_message, "third");
        assert_eq!(message.error_history.len(), 2);
        assert_eq!(message.error_history[0].retry_count, 0);
        assert_eq!(message.error_history[1].retry_count, 1);
    }

    #[test]
    fn poison_clears_the_schedule() {
        let mut message = DlqMessage::new(
            "m1",
            "default",
            "orders",
            Value::Null,
            "err",
            serde_json::json!({}),
        );
        message.next_retry_at_ms = Some(epoch_ms() + 1000);
        message.mark_poison();
        assert_eq!(message.status, MessageStatus::Poison);
        assert_eq!(message.next_retry_at_ms, None);
    }

    #[test]
    fn message_roundtrips_through_json() {
        let message = DlqMessage::new(
            "m1",
            "default",
            "orders",
            serde_json::json!({"k": [1, 2]}),
            "err",
            serde_json::json!({"request_id": "r1"}),
        );
        let raw = serde_json::to_vec(&message).unwrap();
        let parsed: DlqMessage = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, message);
    }
}
