//! The circuit state machine, free of I/O.
//!
//! [`Circuit`] owns every counter and window; the async breaker wraps it in
//! a mutex and handles store synchronization around it.

use crate::events::CircuitBreakerEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded window for error flags and response times.
const WINDOW_CAPACITY: usize = 100;
/// Minimum samples before rate-based triggers apply.
const MIN_WINDOW_SAMPLES: usize = 10;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through.
    Closed,
    /// Calls are rejected.
    Open,
    /// A bounded number of probe calls are admitted.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half_open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

/// Why a circuit tripped open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    ConsecutiveFailures,
    ErrorRate,
    ResponseTime,
    Backpressure,
    Manual,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripReason::ConsecutiveFailures => "consecutive_failures",
            TripReason::ErrorRate => "error_rate",
            TripReason::ResponseTime => "response_time",
            TripReason::Backpressure => "backpressure",
            TripReason::Manual => "manual",
        }
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CircuitMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub consecutive_failures: u64,
    pub consecutive_successes: u64,
    pub total_response_time_ms: u64,
}

impl CircuitMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failed_calls as f64 / self.total_calls as f64
    }

    pub fn average_response_time_ms(&self) -> f64 {
        if self.successful_calls == 0 {
            return 0.0;
        }
        self.total_response_time_ms as f64 / self.successful_calls as f64
    }
}

/// Admission decision for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Admission {
    Allowed,
    /// Circuit open; caller may retry after the remaining window.
    Rejected { retry_after: Duration },
    /// Half-open probe quota exhausted; caller may briefly wait and retry.
    Busy,
}

/// A state transition the breaker must publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: Option<TripReason>,
}

/// Parameters the state machine needs; extracted from the full config so
/// this module stays independent of the generic call types.
#[derive(Debug, Clone)]
pub(crate) struct CircuitPolicy {
    pub name: String,
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub timeout: Duration,
    pub half_open_max_calls: usize,
    pub error_rate_threshold: f64,
    pub response_time_threshold: Option<Duration>,
    pub gradual_recovery: bool,
    pub recovery_factor: f64,
    /// Record slow successes as half a failure (life-critical profile).
    pub slow_success_is_partial_failure: bool,
}

pub(crate) struct Circuit {
    state: CircuitState,
    last_state_change: Instant,
    metrics: CircuitMetrics,
    last_failure_time: Option<Instant>,
    trip_reason: Option<TripReason>,
    half_open_calls: usize,
    recovery_percentage: f64,
    response_times: VecDeque<Duration>,
    error_window: VecDeque<f64>,
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            last_state_change: Instant::now(),
            metrics: CircuitMetrics::default(),
            last_failure_time: None,
            trip_reason: None,
            half_open_calls: 0,
            recovery_percentage: 1.0,
            response_times: VecDeque::with_capacity(WINDOW_CAPACITY),
            error_window: VecDeque::with_capacity(WINDOW_CAPACITY),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn metrics(&self) -> CircuitMetrics {
        self.metrics.clone()
    }

    pub fn trip_reason(&self) -> Option<TripReason> {
        self.trip_reason
    }

    pub fn time_in_state(&self) -> Duration {
        self.last_state_change.elapsed()
    }

    pub fn last_failure_age(&self) -> Option<Duration> {
        self.last_failure_time.map(|at| at.elapsed())
    }

    /// Adopt state observed in the shared store (written by a sibling
    /// process). `age` is how long ago the remote transition happened.
    pub fn adopt_remote(&mut self, state: CircuitState, age: Duration) {
        if self.state != state {
            self.state = state;
            self.last_state_change = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
            if state == CircuitState::HalfOpen {
                self.half_open_calls = 0;
            }
        }
    }

    /// Decide whether one call may proceed. `admission_roll` is a uniform
    /// sample in [0, 1) consumed by gradual recovery.
    pub fn try_acquire(
        &mut self,
        policy: &CircuitPolicy,
        admission_roll: f64,
    ) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let elapsed = self.last_state_change.elapsed();
                if elapsed >= policy.timeout {
                    let transition = self.transition_to(CircuitState::HalfOpen, None, policy);
                    self.half_open_calls += 1;
                    (Admission::Allowed, transition)
                } else {
                    (
                        Admission::Rejected {
                            retry_after: policy.timeout - elapsed,
                        },
                        None,
                    )
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls >= policy.half_open_max_calls {
                    return (Admission::Busy, None);
                }
                if policy.gradual_recovery && admission_roll >= self.recovery_percentage {
                    return (
                        Admission::Rejected {
                            retry_after: policy.timeout,
                        },
                        None,
                    );
                }
                self.half_open_calls += 1;
                (Admission::Allowed, None)
            }
        }
    }

    pub fn release_half_open(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_calls = self.half_open_calls.saturating_sub(1);
        }
    }

    /// Record a successful call. Returns a transition when the circuit
    /// closes (the caller gates it on the optional health probe first).
    pub fn record_success(
        &mut self,
        policy: &CircuitPolicy,
        duration: Duration,
        close_permitted: bool,
    ) -> Option<Transition> {
        self.metrics.total_calls += 1;
        self.metrics.successful_calls += 1;
        self.metrics.total_response_time_ms += duration.as_millis() as u64;
        self.metrics.consecutive_failures = 0;
        self.metrics.consecutive_successes += 1;

        let slow = policy
            .response_time_threshold
            .is_some_and(|threshold| duration >= threshold);
        self.push_error_flag(if slow && policy.slow_success_is_partial_failure {
            0.5
        } else {
            0.0
        });
        self.push_response_time(duration);

        if self.state == CircuitState::HalfOpen {
            if policy.gradual_recovery {
                let progress =
                    self.metrics.consecutive_successes as f64 / policy.success_threshold as f64;
                self.recovery_percentage = (policy.recovery_factor
                    + (1.0 - policy.recovery_factor) * progress)
                    .min(1.0);
            }
            if self.metrics.consecutive_successes >= policy.success_threshold && close_permitted {
                return self.transition_to(CircuitState::Closed, None, policy);
            }
        }
        None
    }

    /// Record a failed call, returning a transition when the circuit trips.
    pub fn record_failure(&mut self, policy: &CircuitPolicy) -> Option<Transition> {
        self.metrics.total_calls += 1;
        self.metrics.failed_calls += 1;
        self.metrics.consecutive_failures += 1;
        self.metrics.consecutive_successes = 0;
        self.last_failure_time = Some(Instant::now());
        self.push_error_flag(1.0);

        match self.state {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, Some(TripReason::ConsecutiveFailures), policy)
            }
            CircuitState::Closed => self.evaluate_trip(policy),
            CircuitState::Open => None,
        }
    }

    /// Force a transition (manual control, backpressure).
    pub fn force(
        &mut self,
        state: CircuitState,
        reason: Option<TripReason>,
        policy: &CircuitPolicy,
    ) -> Option<Transition> {
        self.transition_to(state, reason, policy)
    }

    pub fn reset(&mut self, policy: &CircuitPolicy) -> Option<Transition> {
        self.metrics = CircuitMetrics::default();
        self.response_times.clear();
        self.error_window.clear();
        self.last_failure_time = None;
        self.transition_to(CircuitState::Closed, None, policy)
    }

    fn evaluate_trip(&mut self, policy: &CircuitPolicy) -> Option<Transition> {
        if self.metrics.consecutive_failures >= policy.failure_threshold {
            return self.transition_to(
                CircuitState::Open,
                Some(TripReason::ConsecutiveFailures),
                policy,
            );
        }

        if self.error_window.len() >= MIN_WINDOW_SAMPLES {
            let error_rate =
                self.error_window.iter().sum::<f64>() / self.error_window.len() as f64;
            if error_rate >= policy.error_rate_threshold {
                return self.transition_to(CircuitState::Open, Some(TripReason::ErrorRate), policy);
            }
        }

        if let Some(threshold) = policy.response_time_threshold {
            if self.response_times.len() >= MIN_WINDOW_SAMPLES {
                let total: Duration = self.response_times.iter().sum();
                let average = total / self.response_times.len() as u32;
                if average >= threshold {
                    return self.transition_to(
                        CircuitState::Open,
                        Some(TripReason::ResponseTime),
                        policy,
                    );
                }
            }
        }

        None
    }

    fn transition_to(
        &mut self,
        state: CircuitState,
        reason: Option<TripReason>,
        policy: &CircuitPolicy,
    ) -> Option<Transition> {
        if self.state == state {
            return None;
        }
        let from = self.state;
        self.state = state;
        self.last_state_change = Instant::now();
        self.trip_reason = reason;
        self.metrics.consecutive_failures = 0;
        self.metrics.consecutive_successes = 0;

        match state {
            CircuitState::HalfOpen => {
                self.half_open_calls = 0;
                self.recovery_percentage = if policy.gradual_recovery {
                    policy.recovery_factor
                } else {
                    1.0
                };
            }
            CircuitState::Closed => {
                self.half_open_calls = 0;
                self.recovery_percentage = 1.0;
            }
            CircuitState::Open => {
                self.half_open_calls = 0;
            }
        }

        Some(Transition {
            from,
            to: state,
            reason,
        })
    }

    fn push_error_flag(&mut self, flag: f64) {
        if self.error_window.len() == WINDOW_CAPACITY {
            self.error_window.pop_front();
        }
        self.error_window.push_back(flag);
    }

    fn push_response_time(&mut self, duration: Duration) {
        if self.response_times.len() == WINDOW_CAPACITY {
            self.response_times.pop_front();
        }
        self.response_times.push_back(duration);
    }
}

/// Event payload helper shared with the breaker.
pub(crate) fn transition_event(name: &str, transition: Transition) -> CircuitBreakerEvent {
    CircuitBreakerEvent::StateTransition {
        name: name.to_string(),
        from: transition.from,
        to: transition.to,
        reason: transition.reason,
        timestamp: Instant::now(),
    }
}
