use crate::circuit::{CircuitPolicy, CircuitState, TripReason};
use crate::events::CircuitBreakerEvent;
use gatehouse_core::{EventListeners, FnListener};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type Fallback<T> = Arc<dyn Fn() -> T + Send + Sync>;
pub(crate) type ErrorClassifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
pub(crate) type HealthProbe = Arc<dyn Fn() -> bool + Send + Sync>;
pub(crate) type AlertFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Configuration for one named circuit.
///
/// `T` is the call's success type (used by the fallback), `E` its error
/// type (used by the exclusion classifier).
pub struct CircuitConfig<T, E> {
    pub(crate) name: String,
    pub(crate) failure_threshold: u64,
    pub(crate) success_threshold: u64,
    pub(crate) timeout: Duration,
    pub(crate) half_open_max_calls: usize,
    pub(crate) error_rate_threshold: f64,
    pub(crate) response_time_threshold: Option<Duration>,
    pub(crate) backpressure_threshold: Option<usize>,
    pub(crate) is_excluded: ErrorClassifier<E>,
    pub(crate) fallback: Option<Fallback<T>>,
    pub(crate) health_probe: Option<HealthProbe>,
    pub(crate) gradual_recovery: bool,
    pub(crate) recovery_factor: f64,
    pub(crate) slow_success_is_partial_failure: bool,
    pub(crate) store_ttl: Duration,
    pub(crate) alert_on_open: bool,
    pub(crate) alert: Option<AlertFn>,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl<T, E> CircuitConfig<T, E> {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitConfigBuilder<T, E> {
        CircuitConfigBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn policy(&self) -> CircuitPolicy {
        CircuitPolicy {
            name: self.name.clone(),
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: self.timeout,
            half_open_max_calls: self.half_open_max_calls,
            error_rate_threshold: self.error_rate_threshold,
            response_time_threshold: self.response_time_threshold,
            gradual_recovery: self.gradual_recovery,
            recovery_factor: self.recovery_factor,
            slow_success_is_partial_failure: self.slow_success_is_partial_failure,
        }
    }
}

/// Builder for [`CircuitConfig`].
pub struct CircuitConfigBuilder<T, E> {
    name: String,
    failure_threshold: u64,
    success_threshold: u64,
    timeout: Duration,
    half_open_max_calls: usize,
    error_rate_threshold: f64,
    response_time_threshold: Option<Duration>,
    backpressure_threshold: Option<usize>,
    is_excluded: ErrorClassifier<E>,
    fallback: Option<Fallback<T>>,
    health_probe: Option<HealthProbe>,
    gradual_recovery: bool,
    recovery_factor: f64,
    slow_success_is_partial_failure: bool,
    store_ttl: Duration,
    alert_on_open: bool,
    alert: Option<AlertFn>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl<T, E> CircuitConfigBuilder<T, E> {
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            error_rate_threshold: 0.5,
            response_time_threshold: None,
            backpressure_threshold: None,
            is_excluded: Arc::new(|_| false),
            fallback: None,
            health_probe: None,
            gradual_recovery: false,
            recovery_factor: 0.1,
            slow_success_is_partial_failure: false,
            store_ttl: Duration::from_secs(3600),
            alert_on_open: false,
            alert: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Name of the circuit, used for store keys and observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Consecutive failures that trip the circuit.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: u64) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Consecutive half-open successes required to close.
    ///
    /// Default: 3
    pub fn success_threshold(mut self, n: u64) -> Self {
        self.success_threshold = n;
        self
    }

    /// How long the circuit stays open before probing.
    ///
    /// Default: 60 seconds
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Concurrent probe calls admitted in half-open.
    ///
    /// Default: 3
    pub fn half_open_max_calls(mut self, n: usize) -> Self {
        self.half_open_max_calls = n;
        self
    }

    /// Error rate over the recent window that trips the circuit.
    ///
    /// Default: 0.5
    pub fn error_rate_threshold(mut self, rate: f64) -> Self {
        self.error_rate_threshold = rate;
        self
    }

    /// Average response time over the recent window that trips the circuit.
    ///
    /// Default: disabled
    pub fn response_time_threshold(mut self, threshold: Duration) -> Self {
        self.response_time_threshold = Some(threshold);
        self
    }

    /// Queued + in-flight ceiling; beyond it the circuit trips with
    /// `TripReason::Backpressure`.
    ///
    /// Default: disabled
    pub fn backpressure_threshold(mut self, n: usize) -> Self {
        self.backpressure_threshold = Some(n);
        self
    }

    /// Errors matching this predicate do not count as failures.
    ///
    /// Default: nothing excluded
    pub fn exclude_errors<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_excluded = Arc::new(f);
        self
    }

    /// Value returned instead of an error when the circuit rejects or the
    /// call fails.
    pub fn fallback<F>(mut self, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    /// Extra gate consulted before closing from half-open.
    pub fn health_probe<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.health_probe = Some(Arc::new(f));
        self
    }

    /// Ramp half-open admission from `recovery_factor` to 100% instead of
    /// admitting every probe.
    ///
    /// Default: false
    pub fn gradual_recovery(mut self, enabled: bool) -> Self {
        self.gradual_recovery = enabled;
        self
    }

    /// Initial admitted fraction when gradual recovery begins.
    ///
    /// Default: 0.1
    pub fn recovery_factor(mut self, factor: f64) -> Self {
        self.recovery_factor = factor;
        self
    }

    /// TTL for circuit state mirrored into the shared store.
    ///
    /// Default: 1 hour
    pub fn store_ttl(mut self, ttl: Duration) -> Self {
        self.store_ttl = ttl;
        self
    }

    /// Invoke the alert hook whenever the circuit opens.
    ///
    /// Default: false
    pub fn alert_on_open(mut self, enabled: bool) -> Self {
        self.alert_on_open = enabled;
        self
    }

    /// Alert hook `(circuit_name, message)`.
    pub fn alert<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.alert = Some(Arc::new(f));
        self
    }

    /// Register a callback for state transitions
    /// `(name, old, new, reason)`.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState, Option<TripReason>) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    name,
                    from,
                    to,
                    reason,
                    ..
                } = event
                {
                    f(name, *from, *to, *reason);
                }
            }));
        self
    }

    /// Register a callback for rejected calls.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::CallRejected { name, .. } = event {
                    f(name);
                }
            }));
        self
    }

    /// Apply `GATEHOUSE_CIRCUIT_*` environment overrides:
    /// `FAILURE_THRESHOLD`, `SUCCESS_THRESHOLD`, `TIMEOUT_SECONDS`,
    /// `HALF_OPEN_MAX_CALLS`, `ERROR_RATE_THRESHOLD`, `STORE_TTL_SECONDS`.
    pub fn from_env(mut self) -> Self {
        if let Some(n) = env_parse("GATEHOUSE_CIRCUIT_FAILURE_THRESHOLD") {
            self.failure_threshold = n;
        }
        if let Some(n) = env_parse("GATEHOUSE_CIRCUIT_SUCCESS_THRESHOLD") {
            self.success_threshold = n;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_CIRCUIT_TIMEOUT_SECONDS") {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("GATEHOUSE_CIRCUIT_HALF_OPEN_MAX_CALLS") {
            self.half_open_max_calls = n;
        }
        if let Some(rate) = env_parse("GATEHOUSE_CIRCUIT_ERROR_RATE_THRESHOLD") {
            self.error_rate_threshold = rate;
        }
        if let Some(secs) = env_parse::<u64>("GATEHOUSE_CIRCUIT_STORE_TTL_SECONDS") {
            self.store_ttl = Duration::from_secs(secs);
        }
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> CircuitConfig<T, E> {
        if self.failure_threshold == 0 {
            panic!("failure_threshold must be at least 1");
        }
        if self.success_threshold == 0 {
            panic!("success_threshold must be at least 1");
        }
        if self.half_open_max_calls == 0 {
            panic!("half_open_max_calls must be at least 1");
        }
        if !self.error_rate_threshold.is_finite() || self.error_rate_threshold <= 0.0 {
            panic!("error_rate_threshold must be a positive finite number");
        }
        if self.gradual_recovery && !(0.0 < self.recovery_factor && self.recovery_factor <= 1.0) {
            panic!("recovery_factor must lie in (0, 1]");
        }

        CircuitConfig {
            name: self.name,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: self.timeout,
            half_open_max_calls: self.half_open_max_calls,
            error_rate_threshold: self.error_rate_threshold,
            response_time_threshold: self.response_time_threshold,
            backpressure_threshold: self.backpressure_threshold,
            is_excluded: self.is_excluded,
            fallback: self.fallback,
            health_probe: self.health_probe,
            gradual_recovery: self.gradual_recovery,
            recovery_factor: self.recovery_factor,
            slow_success_is_partial_failure: self.slow_success_is_partial_failure,
            store_ttl: self.store_ttl,
            alert_on_open: self.alert_on_open,
            alert: self.alert,
            event_listeners: self.event_listeners,
        }
    }
}

impl<T, E> CircuitConfigBuilder<T, E> {
    // =========================================================================
    // Presets
    // =========================================================================

    /// Preset: balanced defaults for typical upstreams.
    pub fn standard() -> Self {
        Self::new()
            .failure_threshold(5)
            .success_threshold(3)
            .timeout(Duration::from_secs(60))
            .half_open_max_calls(3)
    }

    /// Preset: opens quickly and probes cautiously; for latency-sensitive
    /// call sites.
    pub fn fast_fail() -> Self {
        Self::new()
            .failure_threshold(3)
            .success_threshold(2)
            .timeout(Duration::from_secs(10))
            .half_open_max_calls(1)
            .error_rate_threshold(0.25)
    }

    /// Preset: enhanced safety profile. Slow successes count as partial
    /// failures, recovery is gradual, and opening raises an alert.
    pub fn life_critical() -> Self {
        let mut builder = Self::new()
            .failure_threshold(2)
            .success_threshold(5)
            .timeout(Duration::from_secs(120))
            .half_open_max_calls(1)
            .error_rate_threshold(0.1)
            .response_time_threshold(Duration::from_secs(1))
            .gradual_recovery(true)
            .recovery_factor(0.1)
            .alert_on_open(true);
        builder.slow_success_is_partial_failure = true;
        builder
    }
}

impl<T, E> Default for CircuitConfigBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<V: std::str::FromStr>(name: &str) -> Option<V> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => panic!("invalid value for {name}: {raw}"),
        },
        Err(_) => None,
    }
}
