use crate::backpressure::{BackpressureHandler, BackpressureLoad};
use crate::circuit::{
    transition_event, Admission, Circuit, CircuitMetrics, CircuitPolicy, CircuitState, Transition,
    TripReason,
};
use crate::config::CircuitConfig;
use crate::error::CircuitBreakerError;
use crate::events::CircuitBreakerEvent;
use gatehouse_core::{keys, SharedStore};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// How long an excess half-open caller waits before its single retry.
const HALF_OPEN_WAIT: Duration = Duration::from_millis(100);

/// Statistics snapshot for one circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub metrics: CircuitMetrics,
    pub time_in_state: Duration,
    pub last_failure_age: Option<Duration>,
    pub trip_reason: Option<TripReason>,
    /// Remaining open window, when the circuit is open.
    pub next_attempt_in: Option<Duration>,
    pub backpressure: BackpressureLoad,
}

/// A named gate around an upstream call site.
pub struct CircuitBreaker<T, E> {
    config: Arc<CircuitConfig<T, E>>,
    policy: CircuitPolicy,
    circuit: Mutex<Circuit>,
    store: Option<SharedStore>,
    backpressure: Arc<BackpressureHandler>,
}

impl<T, E> CircuitBreaker<T, E> {
    /// Build a breaker with purely local state.
    pub fn new(config: CircuitConfig<T, E>) -> Self {
        Self::with_parts(config, None, Arc::new(BackpressureHandler::new()))
    }

    /// Build a breaker that mirrors state into the shared store so sibling
    /// processes agree on open/closed.
    pub fn with_store(config: CircuitConfig<T, E>, store: SharedStore) -> Self {
        Self::with_parts(config, Some(store), Arc::new(BackpressureHandler::new()))
    }

    pub(crate) fn with_parts(
        config: CircuitConfig<T, E>,
        store: Option<SharedStore>,
        backpressure: Arc<BackpressureHandler>,
    ) -> Self {
        let policy = config.policy();
        Self {
            config: Arc::new(config),
            policy,
            circuit: Mutex::new(Circuit::new()),
            store,
            backpressure,
        }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Current state (local view).
    pub fn state(&self) -> CircuitState {
        self.circuit.lock().unwrap().state()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CircuitStats {
        let circuit = self.circuit.lock().unwrap();
        let time_in_state = circuit.time_in_state();
        let next_attempt_in = if circuit.state() == CircuitState::Open {
            Some(self.policy.timeout.saturating_sub(time_in_state))
        } else {
            None
        };
        CircuitStats {
            state: circuit.state(),
            metrics: circuit.metrics(),
            time_in_state,
            last_failure_age: circuit.last_failure_age(),
            trip_reason: circuit.trip_reason(),
            next_attempt_in,
            backpressure: self.backpressure.load(&self.policy.name),
        }
    }

    /// Execute `f` under the breaker's protection.
    pub async fn call<F, Fut>(&self, f: F) -> Result<T, CircuitBreakerError<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let name = self.policy.name.clone();

        if let Some(threshold) = self.config.backpressure_threshold {
            if !self.backpressure.can_accept(&name, threshold) {
                let transition = {
                    let mut circuit = self.circuit.lock().unwrap();
                    circuit.force(
                        CircuitState::Open,
                        Some(TripReason::Backpressure),
                        &self.policy,
                    )
                };
                self.apply_transition(transition).await;
                return Err(CircuitBreakerError::Backpressure {
                    name,
                    fallback: self.compute_fallback(),
                });
            }
        }

        self.backpressure.enqueue(&name);
        self.sync_remote_state().await;

        let mut admission = self.acquire();
        if matches!(admission.0, Admission::Busy) {
            // Give in-flight probes one chance to finish, then retry once.
            tokio::time::sleep(HALF_OPEN_WAIT).await;
            admission = self.acquire();
        }
        let (admission, transition) = admission;
        self.apply_transition(transition).await;

        match admission {
            Admission::Allowed => {}
            Admission::Rejected { .. } | Admission::Busy => {
                let retry_after = match admission {
                    Admission::Rejected { retry_after } => retry_after,
                    _ => HALF_OPEN_WAIT,
                };
                self.backpressure.dequeue(&name);
                self.config
                    .event_listeners
                    .emit(&CircuitBreakerEvent::CallRejected {
                        name: name.clone(),
                        timestamp: Instant::now(),
                    });

                #[cfg(feature = "metrics")]
                metrics::counter!("circuitbreaker_calls_rejected_total", "circuit" => name.clone())
                    .increment(1);

                return Err(CircuitBreakerError::Open {
                    name,
                    retry_after,
                    fallback: self.compute_fallback(),
                });
            }
        }

        let holding_half_open = self.state() == CircuitState::HalfOpen;
        self.backpressure.start_processing(&name);
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::CallPermitted {
                name: name.clone(),
                state: self.state(),
                timestamp: Instant::now(),
            });

        let start = Instant::now();
        let result = f().await;
        let duration = start.elapsed();

        #[cfg(feature = "metrics")]
        metrics::histogram!("circuitbreaker_call_duration_seconds", "circuit" => name.clone())
            .record(duration.as_secs_f64());

        let outcome = match result {
            Ok(value) => {
                self.on_success(duration, holding_half_open).await;
                Ok(value)
            }
            Err(err) if (self.config.is_excluded)(&err) => {
                // Excluded errors count as successes but still surface.
                self.on_success(duration, holding_half_open).await;
                Err(CircuitBreakerError::Inner(err))
            }
            Err(err) => {
                self.on_failure(holding_half_open).await;
                match &self.config.fallback {
                    Some(fallback) => Ok(fallback()),
                    None => Err(CircuitBreakerError::Inner(err)),
                }
            }
        };

        self.backpressure.finish_processing(&name);
        outcome
    }

    /// Manually trip the circuit open.
    pub async fn open(&self) {
        let transition = {
            let mut circuit = self.circuit.lock().unwrap();
            circuit.force(CircuitState::Open, Some(TripReason::Manual), &self.policy)
        };
        self.apply_transition(transition).await;
    }

    /// Manually close the circuit.
    pub async fn close(&self) {
        let transition = {
            let mut circuit = self.circuit.lock().unwrap();
            circuit.force(CircuitState::Closed, None, &self.policy)
        };
        self.apply_transition(transition).await;
    }

    /// Clear metrics and close the circuit.
    pub async fn reset(&self) {
        let transition = {
            let mut circuit = self.circuit.lock().unwrap();
            circuit.reset(&self.policy)
        };
        if let Some(store) = &self.store {
            let _ = store
                .delete(&[keys::circuit_metrics(&self.policy.name)])
                .await;
        }
        self.apply_transition(transition).await;
    }

    fn acquire(&self) -> (Admission, Option<Transition>) {
        let roll = rand::random::<f64>();
        let mut circuit = self.circuit.lock().unwrap();
        circuit.try_acquire(&self.policy, roll)
    }

    async fn on_success(&self, duration: Duration, holding_half_open: bool) {
        let slow = self
            .policy
            .response_time_threshold
            .is_some_and(|threshold| duration >= threshold);
        if slow {
            self.config
                .event_listeners
                .emit(&CircuitBreakerEvent::SlowCallDetected {
                    name: self.policy.name.clone(),
                    duration,
                    timestamp: Instant::now(),
                });
        }

        // Consult the optional probe only when a close is possible.
        let close_permitted = if self.state() == CircuitState::HalfOpen {
            self.config
                .health_probe
                .as_ref()
                .map_or(true, |probe| probe())
        } else {
            true
        };

        let transition = {
            let mut circuit = self.circuit.lock().unwrap();
            let transition = circuit.record_success(&self.policy, duration, close_permitted);
            if holding_half_open {
                circuit.release_half_open();
            }
            transition
        };
        self.apply_transition(transition).await;
        self.persist_metrics(true, duration).await;
    }

    async fn on_failure(&self, holding_half_open: bool) {
        let transition = {
            let mut circuit = self.circuit.lock().unwrap();
            let transition = circuit.record_failure(&self.policy);
            if holding_half_open {
                circuit.release_half_open();
            }
            transition
        };
        self.apply_transition(transition).await;
        self.persist_metrics(false, Duration::ZERO).await;
    }

    fn compute_fallback(&self) -> Option<T> {
        self.config.fallback.as_ref().map(|fallback| fallback())
    }

    async fn apply_transition(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        let name = &self.policy.name;

        self.config
            .event_listeners
            .emit(&transition_event(name, transition));

        #[cfg(feature = "tracing")]
        tracing::info!(
            circuit = %name,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            reason = transition.reason.map(|r| r.as_str()),
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "circuitbreaker_transitions_total",
            "circuit" => name.clone(),
            "from" => transition.from.as_str(),
            "to" => transition.to.as_str()
        )
        .increment(1);

        if transition.to == CircuitState::Open && self.config.alert_on_open {
            if let Some(alert) = &self.config.alert {
                alert(name, "circuit breaker opened");
            }
        }

        if let Some(store) = &self.store {
            let ttl = Some(self.config.store_ttl);
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            if let Err(err) = store
                .set(&keys::circuit_state(name), transition.to.as_str().as_bytes(), ttl)
                .await
            {
                self.log_store_error("state", &err);
            }
            if let Err(err) = store
                .set(
                    &keys::circuit_last_change(name),
                    epoch.to_string().as_bytes(),
                    ttl,
                )
                .await
            {
                self.log_store_error("last_change", &err);
            }
        }
    }

    async fn sync_remote_state(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let name = &self.policy.name;

        let remote = match store.get(&keys::circuit_state(name)).await {
            Ok(Some(raw)) => String::from_utf8(raw).ok().and_then(|s| CircuitState::parse(&s)),
            Ok(None) => None,
            Err(err) => {
                // Degrade to the local view; the breaker must keep working
                // without the store.
                self.log_store_error("state read", &err);
                None
            }
        };
        let Some(remote) = remote else {
            return;
        };

        let age = match store.get(&keys::circuit_last_change(name)).await {
            Ok(Some(raw)) => String::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .map(|changed| {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs_f64();
                    Duration::from_secs_f64((now - changed).max(0.0))
                })
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        };

        self.circuit.lock().unwrap().adopt_remote(remote, age);
    }

    async fn persist_metrics(&self, success: bool, duration: Duration) {
        let Some(store) = &self.store else {
            return;
        };
        let key = keys::circuit_metrics(&self.policy.name);
        let duration_ms = duration.as_millis() as u64;
        let result = store
            .fetch_update(
                &key,
                Some(self.config.store_ttl),
                Box::new(move |current| {
                    let mut metrics: CircuitMetrics = current
                        .and_then(|raw| serde_json::from_slice(raw).ok())
                        .unwrap_or_default();
                    metrics.total_calls += 1;
                    if success {
                        metrics.successful_calls += 1;
                        metrics.total_response_time_ms += duration_ms;
                        metrics.consecutive_failures = 0;
                        metrics.consecutive_successes += 1;
                    } else {
                        metrics.failed_calls += 1;
                        metrics.consecutive_failures += 1;
                        metrics.consecutive_successes = 0;
                    }
                    serde_json::to_vec(&metrics).ok()
                }),
            )
            .await;
        if let Err(err) = result {
            self.log_store_error("metrics", &err);
        }
    }

    fn log_store_error(&self, what: &str, err: &gatehouse_core::StoreError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(circuit = %self.policy.name, what, error = %err, "circuit store update failed");
        #[cfg(not(feature = "tracing"))]
        let _ = (what, err);

        #[cfg(feature = "metrics")]
        metrics::counter!("circuitbreaker_store_errors_total").increment(1);
    }
}

/// Manages a set of circuit breakers sharing one backpressure handler and
/// (optionally) one store.
pub struct CircuitBreakerGroup<T, E> {
    store: Option<SharedStore>,
    backpressure: Arc<BackpressureHandler>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker<T, E>>>>,
}

impl<T, E> CircuitBreakerGroup<T, E> {
    pub fn new() -> Self {
        Self {
            store: None,
            backpressure: Arc::new(BackpressureHandler::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_store(store: SharedStore) -> Self {
        Self {
            store: Some(store),
            backpressure: Arc::new(BackpressureHandler::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a breaker under its configured name.
    pub fn add_breaker(&self, config: CircuitConfig<T, E>) -> Arc<CircuitBreaker<T, E>> {
        let breaker = Arc::new(CircuitBreaker::with_parts(
            config,
            self.store.clone(),
            Arc::clone(&self.backpressure),
        ));
        self.breakers
            .write()
            .unwrap()
            .insert(breaker.name().to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<T, E>>> {
        self.breakers.read().unwrap().get(name).cloned()
    }

    pub fn stats(&self) -> HashMap<String, CircuitStats> {
        self.breakers
            .read()
            .unwrap()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    pub fn backpressure_stats(&self) -> HashMap<String, BackpressureLoad> {
        self.breakers
            .read()
            .unwrap()
            .keys()
            .map(|name| (name.clone(), self.backpressure.load(name)))
            .collect()
    }

    pub async fn open_all(&self) {
        for breaker in self.all() {
            breaker.open().await;
        }
    }

    pub async fn close_all(&self) {
        for breaker in self.all() {
            breaker.close().await;
        }
    }

    pub async fn reset_all(&self) {
        for breaker in self.all() {
            breaker.reset().await;
        }
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker<T, E>>> {
        self.breakers.read().unwrap().values().cloned().collect()
    }
}

impl<T, E> Default for CircuitBreakerGroup<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitConfigBuilder;
    use gatehouse_core::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Breaker = CircuitBreaker<&'static str, &'static str>;

    fn config() -> CircuitConfigBuilder<&'static str, &'static str> {
        CircuitConfig::builder()
            .name("test")
            .failure_threshold(3)
            .success_threshold(2)
            .timeout(Duration::from_millis(100))
            .half_open_max_calls(2)
    }

    async fn fail(breaker: &Breaker) {
        let _ = breaker.call(|| async { Err::<&'static str, _>("boom") }).await;
    }

    #[tokio::test]
    async fn opens_then_half_opens_then_closes() {
        let breaker = Breaker::new(config().build());

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Calls inside the open window are rejected with a retry hint.
        let rejected = breaker.call(|| async { Ok("ok") }).await;
        match rejected {
            Err(CircuitBreakerError::Open { retry_after, .. }) => {
                assert!(retry_after > Duration::ZERO)
            }
            other => panic!("expected Open rejection, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(breaker.call(|| async { Ok("ok") }).await.unwrap(), "ok");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.call(|| async { Ok("ok") }).await.unwrap(), "ok");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = Breaker::new(config().build());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn fallback_replaces_failures_and_rejections() {
        let breaker = Breaker::new(config().fallback(|| "fallback").build());

        // Inner failure: fallback value is returned instead of the error.
        let value = breaker
            .call(|| async { Err::<&'static str, _>("boom") })
            .await
            .unwrap();
        assert_eq!(value, "fallback");

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.call(|| async { Ok("ok") }).await;
        match rejected {
            Err(err) => assert_eq!(err.into_fallback(), Some("fallback")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn excluded_errors_do_not_trip() {
        let breaker = Breaker::new(
            config()
                .exclude_errors(|err: &&'static str| *err == "expected")
                .build(),
        );

        for _ in 0..10 {
            let result = breaker
                .call(|| async { Err::<&'static str, _>("expected") })
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Inner("expected"))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn backpressure_trips_the_circuit() {
        let breaker = Arc::new(Breaker::new(
            config().backpressure_threshold(1).build(),
        ));

        let slow = Arc::clone(&breaker);
        let inflight = tokio::spawn(async move {
            slow.call(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("slow")
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = breaker.call(|| async { Ok("fast") }).await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::Backpressure { .. })
        ));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().trip_reason, Some(TripReason::Backpressure));

        let _ = inflight.await.unwrap();
    }

    #[tokio::test]
    async fn state_change_callbacks_fire() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&transitions);
        let breaker = Breaker::new(
            config()
                .on_state_change(move |_, _, to, _| {
                    if to == CircuitState::Open {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build(),
        );

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn alert_fires_on_open() {
        let alerts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&alerts);
        let breaker = Breaker::new(
            config()
                .alert_on_open(true)
                .alert(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
                .build(),
        );
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distributed_state_is_shared_between_breakers() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let first = Breaker::with_store(config().build(), Arc::clone(&store));
        let second = Breaker::with_store(config().build(), Arc::clone(&store));

        for _ in 0..3 {
            fail(&first).await;
        }
        assert_eq!(first.state(), CircuitState::Open);

        // The sibling adopts the open state from the store on its next call.
        let result = second.call(|| async { Ok("ok") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(second.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn manual_controls() {
        let breaker = Breaker::new(config().build());
        breaker.open().await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().trip_reason, Some(TripReason::Manual));
        assert!(breaker.stats().next_attempt_in.is_some());

        breaker.close().await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await;
        breaker.reset().await;
        assert_eq!(breaker.stats().metrics, CircuitMetrics::default());
    }

    #[tokio::test]
    async fn group_shares_backpressure_and_lists_stats() {
        let group: CircuitBreakerGroup<&'static str, &'static str> = CircuitBreakerGroup::new();
        group.add_breaker(config().name("a").build());
        group.add_breaker(config().name("b").build());

        assert!(group.get("a").is_some());
        assert!(group.get("missing").is_none());

        group.open_all().await;
        let stats = group.stats();
        assert_eq!(stats.len(), 2);
        assert!(stats.values().all(|s| s.state == CircuitState::Open));

        group.reset_all().await;
        assert!(group
            .stats()
            .values()
            .all(|s| s.state == CircuitState::Closed));
    }
}
