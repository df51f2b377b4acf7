use crate::circuit::{CircuitState, TripReason};
use gatehouse_core::ControlEvent;
use std::time::{Duration, Instant};

/// Events emitted by a circuit breaker.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    StateTransition {
        name: String,
        from: CircuitState,
        to: CircuitState,
        reason: Option<TripReason>,
        timestamp: Instant,
    },
    CallPermitted {
        name: String,
        state: CircuitState,
        timestamp: Instant,
    },
    CallRejected {
        name: String,
        timestamp: Instant,
    },
    SlowCallDetected {
        name: String,
        duration: Duration,
        timestamp: Instant,
    },
}

impl ControlEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SlowCallDetected { .. } => "slow_call_detected",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SlowCallDetected { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { name, .. }
            | CircuitBreakerEvent::CallPermitted { name, .. }
            | CircuitBreakerEvent::CallRejected { name, .. }
            | CircuitBreakerEvent::SlowCallDetected { name, .. } => name,
        }
    }
}
