//! The full request pipeline wired from real subsystems over one store.

use async_trait::async_trait;
use gatehouse_circuitbreaker::CircuitConfig;
use gatehouse_core::{MemoryStore, SharedStore};
use gatehouse_discovery::{DiscoveryConfig, ServiceDiscovery, ServiceRegistration};
use gatehouse_dlq::{DeadLetterQueue, MessageStatus, RetryConfig};
use gatehouse_healthcheck::{HealthCheck, HealthCheckResult, HealthConfig, HealthMonitor};
use gatehouse_pipeline::{Coordinator, RequestEnvelope, RequestHandler};
use gatehouse_ratelimiter::{RateLimitConfig, RateLimiter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    fn name(&self) -> &str {
        "static"
    }

    async fn check(&self) -> HealthCheckResult {
        HealthCheckResult::healthy("static", "ok")
    }
}

struct Handler {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl RequestHandler for Handler {
    async fn handle(&self, request: &RequestEnvelope) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err("downstream failure".to_string())
        } else {
            Ok(json!({"served": request.endpoint}))
        }
    }
}

async fn build(store: SharedStore, rate_limit: u64) -> (Coordinator, Arc<DeadLetterQueue>) {
    let health = HealthMonitor::new(
        Arc::clone(&store),
        "gateway",
        HealthConfig::builder().build(),
    );
    health.register_check(Arc::new(AlwaysHealthy));

    let limiter = RateLimiter::new(
        Arc::clone(&store),
        RateLimitConfig::builder()
            .requests_per_window(rate_limit)
            .window_seconds(60)
            .build(),
    );

    let discovery = ServiceDiscovery::new(Arc::clone(&store), DiscoveryConfig::builder().build());
    discovery
        .register(ServiceRegistration::new("schemas", "10.0.0.1", 8080))
        .await
        .unwrap();

    let dlq = Arc::new(DeadLetterQueue::new(
        Arc::clone(&store),
        RetryConfig::builder().build(),
    ));

    let coordinator = Coordinator::builder()
        .health(Arc::new(health))
        .rate_limiter(Arc::new(limiter))
        .discovery(Arc::new(discovery))
        .dlq(Arc::clone(&dlq))
        .circuit_store(Arc::clone(&store))
        .circuit_factory(|service| {
            CircuitConfig::builder()
                .name(service.to_string())
                .failure_threshold(2)
                .success_threshold(1)
                .timeout(Duration::from_millis(300))
                .build()
        })
        .build();

    (coordinator, dlq)
}

fn handler() -> Arc<Handler> {
    Arc::new(Handler {
        calls: AtomicUsize::new(0),
        fail: AtomicBool::new(false),
    })
}

#[tokio::test]
async fn request_flows_through_every_stage() {
    let (coordinator, _dlq) = build(Arc::new(MemoryStore::new()), 100).await;
    let handler = handler();

    let envelope = RequestEnvelope::new("GET", "/schemas/7", "203.0.113.1").user("u1");
    let response = coordinator.process(&envelope, handler.as_ref()).await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body.clone().unwrap()["served"], "/schemas/7");
    assert_eq!(
        response.header_value("X-Request-Id"),
        Some(envelope.request_id.as_str())
    );
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn denial_short_circuits_later_stages() {
    let (coordinator, _dlq) = build(Arc::new(MemoryStore::new()), 1).await;
    let handler = handler();

    let envelope = RequestEnvelope::new("GET", "/schemas/7", "203.0.113.1").user("u1");
    assert_eq!(
        coordinator
            .process(&envelope, handler.as_ref())
            .await
            .status_code,
        200
    );

    let denied = coordinator.process(&envelope, handler.as_ref()).await;
    assert_eq!(denied.status_code, 429);
    assert_eq!(denied.header_value("X-RateLimit-Remaining"), Some("0"));
    // The handler (and everything after the limiter) never ran.
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn circuit_denial_captures_context_metadata() {
    let (coordinator, dlq) = build(Arc::new(MemoryStore::new()), 100).await;
    let handler = handler();
    handler.fail.store(true, Ordering::SeqCst);

    // Two failures trip the per-service breaker.
    for n in 0..2 {
        let envelope =
            RequestEnvelope::new("GET", "/schemas/7", "203.0.113.1").body(json!({ "n": n }));
        let response = coordinator.process(&envelope, handler.as_ref()).await;
        assert_eq!(response.status_code, 500);
    }

    let envelope =
        RequestEnvelope::new("GET", "/schemas/7", "203.0.113.1").body(json!({"n": "gated"}));
    let response = coordinator.process(&envelope, handler.as_ref()).await;
    assert_eq!(response.status_code, 503);
    assert!(response.header_value("Retry-After").is_some());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

    // The captured envelope carries the accumulated stage metadata: every
    // earlier stage's annotation survives into the capture.
    let captured = dlq
        .list_messages("default", Some(MessageStatus::Pending), 10, 0)
        .await
        .unwrap();
    let gated = captured
        .iter()
        .find(|message| message.error_message == "circuit open")
        .expect("circuit denial should be captured");
    assert_eq!(gated.original_queue, "schemas");
    assert_eq!(gated.metadata["denied_by"], "circuit");
    assert_eq!(gated.metadata["health"]["status"], "healthy");
    assert_eq!(gated.metadata["rate_limit"]["allowed"], true);
    assert!(gated.metadata["discovered_instance"]["id"]
        .as_str()
        .unwrap()
        .starts_with("schemas-"));
}

#[tokio::test]
async fn sibling_gateways_share_circuit_state_through_the_store() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let (first, _) = build(Arc::clone(&store), 100).await;
    let (second, _) = build(Arc::clone(&store), 100).await;
    let failing = handler();
    failing.fail.store(true, Ordering::SeqCst);

    for n in 0..2 {
        let envelope =
            RequestEnvelope::new("GET", "/schemas/7", "203.0.113.1").body(json!({ "n": n }));
        first.process(&envelope, failing.as_ref()).await;
    }

    // The sibling process sees the open circuit on its first request.
    let healthy = handler();
    let envelope =
        RequestEnvelope::new("GET", "/schemas/7", "203.0.113.1").body(json!({"n": "sibling"}));
    let response = second.process(&envelope, healthy.as_ref()).await;
    assert_eq!(response.status_code, 503);
    assert_eq!(healthy.calls.load(Ordering::SeqCst), 0);
}
