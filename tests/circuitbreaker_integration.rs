//! The open -> half-open -> closed recovery cycle end to end.

use gatehouse_circuitbreaker::{
    CircuitBreaker, CircuitBreakerError, CircuitConfig, CircuitState,
};
use std::time::Duration;

type Breaker = CircuitBreaker<&'static str, &'static str>;

fn breaker(timeout: Duration) -> Breaker {
    Breaker::new(
        CircuitConfig::builder()
            .name("upstream")
            .failure_threshold(3)
            .success_threshold(2)
            .timeout(timeout)
            .half_open_max_calls(2)
            .build(),
    )
}

#[tokio::test]
async fn recovery_cycle() {
    let breaker = breaker(Duration::from_millis(500));

    // Three consecutive failures trip the circuit.
    for _ in 0..3 {
        let result = breaker.call(|| async { Err::<&'static str, _>("boom") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Inner("boom"))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Callers inside the open window are rejected with the remaining
    // window as the retry hint.
    let rejected = breaker.call(|| async { Ok("ok") }).await;
    match rejected {
        Err(CircuitBreakerError::Open { retry_after, .. }) => {
            assert!(retry_after <= Duration::from_millis(500));
            assert!(retry_after > Duration::ZERO);
        }
        other => panic!("expected open rejection, got {other:?}"),
    }

    // After the timeout one probe is admitted; a single success is not
    // enough to close.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(breaker.call(|| async { Ok("ok") }).await.unwrap(), "ok");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // The second consecutive success closes the circuit.
    assert_eq!(breaker.call(|| async { Ok("ok") }).await.unwrap(), "ok");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn half_open_failure_restarts_the_open_window() {
    let breaker = breaker(Duration::from_millis(100));

    for _ in 0..3 {
        let _ = breaker.call(|| async { Err::<&'static str, _>("boom") }).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The probe fails: straight back to open, not closed.
    let _ = breaker.call(|| async { Err::<&'static str, _>("boom") }).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // And the open window applies again.
    let rejected = breaker.call(|| async { Ok("ok") }).await;
    assert!(matches!(rejected, Err(CircuitBreakerError::Open { .. })));
}

#[tokio::test]
async fn no_close_without_enough_successes() {
    let breaker = Breaker::new(
        CircuitConfig::builder()
            .name("strict")
            .failure_threshold(2)
            .success_threshold(3)
            .timeout(Duration::from_millis(100))
            .half_open_max_calls(5)
            .build(),
    );

    for _ in 0..2 {
        let _ = breaker.call(|| async { Err::<&'static str, _>("boom") }).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Two successes are below the threshold of three.
    for _ in 0..2 {
        let _ = breaker.call(|| async { Ok("ok") }).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }
    let _ = breaker.call(|| async { Ok("ok") }).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}
