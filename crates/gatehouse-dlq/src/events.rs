use gatehouse_core::ControlEvent;
use std::time::Instant;

/// Events emitted by the dead-letter queue.
#[derive(Debug, Clone)]
pub enum DlqEvent {
    MessageEnqueued {
        queue: String,
        id: String,
        timestamp: Instant,
    },
    DuplicateRejected {
        queue: String,
        content_hash: String,
        timestamp: Instant,
    },
    RetrySucceeded {
        queue: String,
        id: String,
        timestamp: Instant,
    },
    RetryFailed {
        queue: String,
        id: String,
        retry_count: u32,
        timestamp: Instant,
    },
    MessagePoisoned {
        queue: String,
        id: String,
        reason: String,
        timestamp: Instant,
    },
    MessageExpired {
        queue: String,
        id: String,
        timestamp: Instant,
    },
}

impl ControlEvent for DlqEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DlqEvent::MessageEnqueued { .. } => "message_enqueued",
            DlqEvent::DuplicateRejected { .. } => "duplicate_rejected",
            DlqEvent::RetrySucceeded { .. } => "retry_succeeded",
            DlqEvent::RetryFailed { .. } => "retry_failed",
            DlqEvent::MessagePoisoned { .. } => "message_poisoned",
            DlqEvent::MessageExpired { .. } => "message_expired",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            DlqEvent::MessageEnqueued { timestamp, .. }
            | DlqEvent::DuplicateRejected { timestamp, .. }
            | DlqEvent::RetrySucceeded { timestamp, .. }
            | DlqEvent::RetryFailed { timestamp, .. }
            | DlqEvent::MessagePoisoned { timestamp, .. }
            | DlqEvent::MessageExpired { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            DlqEvent::MessageEnqueued { queue, .. }
            | DlqEvent::DuplicateRejected { queue, .. }
            | DlqEvent::RetrySucceeded { queue, .. }
            | DlqEvent::RetryFailed { queue, .. }
            | DlqEvent::MessagePoisoned { queue, .. }
            | DlqEvent::MessageExpired { queue, .. } => queue,
        }
    }
}
