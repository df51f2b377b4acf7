use gatehouse_core::ControlEvent;
use std::time::Instant;

/// Events emitted by the rate limiter.
#[derive(Debug, Clone)]
pub enum RateLimitEvent {
    CheckAllowed {
        key: String,
        remaining: u64,
        timestamp: Instant,
    },
    CheckDenied {
        key: String,
        retry_after: Option<u64>,
        timestamp: Instant,
    },
    /// A store failure was swallowed and the request allowed (fail-open).
    StoreErrorIgnored {
        error: String,
        timestamp: Instant,
    },
}

impl ControlEvent for RateLimitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimitEvent::CheckAllowed { .. } => "check_allowed",
            RateLimitEvent::CheckDenied { .. } => "check_denied",
            RateLimitEvent::StoreErrorIgnored { .. } => "store_error_ignored",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimitEvent::CheckAllowed { timestamp, .. }
            | RateLimitEvent::CheckDenied { timestamp, .. }
            | RateLimitEvent::StoreErrorIgnored { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        "ratelimiter"
    }
}
