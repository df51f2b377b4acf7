use crate::context::{MiddlewareContext, RequestEnvelope, ResponseEnvelope};
use crate::middleware::{Core, Middleware, Next};
use async_trait::async_trait;
use futures::future::BoxFuture;
use gatehouse_circuitbreaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerGroup, CircuitConfig,
};
use gatehouse_discovery::ServiceDiscovery;
use gatehouse_dlq::DeadLetterQueue;
use gatehouse_healthcheck::HealthMonitor;
use gatehouse_ratelimiter::RateLimiter;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

type CircuitFactory = dyn Fn(&str) -> CircuitConfig<Value, String> + Send + Sync;

/// The business handler a request is ultimately dispatched to.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &RequestEnvelope) -> Result<Value, String>;
}

/// Composes the request-control subsystems into one ordered,
/// short-circuiting pipeline.
pub struct Coordinator {
    health: Arc<HealthMonitor>,
    limiter: Arc<RateLimiter>,
    discovery: Arc<ServiceDiscovery>,
    dlq: Arc<DeadLetterQueue>,
    breakers: CircuitBreakerGroup<Value, String>,
    circuit_factory: Arc<CircuitFactory>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl Coordinator {
    /// Builder over already-constructed subsystems.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Register a custom middleware; it runs after the built-in stages.
    pub fn register_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().unwrap().push(middleware);
    }

    /// Run one request through the pipeline.
    pub async fn process(
        &self,
        envelope: &RequestEnvelope,
        handler: &dyn RequestHandler,
    ) -> ResponseEnvelope {
        let mut ctx = MiddlewareContext::from_envelope(envelope);
        let response = self.run_stages(envelope, &mut ctx, handler).await;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            request_id = %envelope.request_id,
            endpoint = %envelope.endpoint,
            status = response.status_code,
            "pipeline completed"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "pipeline_requests_total",
            "status" => response.status_code.to_string()
        )
        .increment(1);

        // The context is dropped with this frame; responses only carry the
        // correlation id.
        response.with_header("X-Request-Id", envelope.request_id.clone())
    }

    async fn run_stages(
        &self,
        envelope: &RequestEnvelope,
        ctx: &mut MiddlewareContext,
        handler: &dyn RequestHandler,
    ) -> ResponseEnvelope {
        // Stage 1: health gate.
        let health = self.health.check_health().await;
        ctx.add_metadata("health", json!({ "status": health.status.as_str() }));
        if !health.is_serviceable() {
            ctx.add_metadata("denied_by", json!("health"));
            let failed: Vec<Value> = health
                .failed_checks()
                .map(|check| json!({"name": check.name, "message": check.message}))
                .collect();
            return ResponseEnvelope::new(503).with_body(json!({
                "error": "service unavailable",
                "details": { "status": health.status.as_str(), "failed_checks": failed },
            }));
        }

        // Stage 2: rate limiting. The limiter fails open internally.
        let decision = self
            .limiter
            .check(
                envelope.user_id.as_deref(),
                Some(&envelope.ip_address),
                Some(&envelope.endpoint),
            )
            .await;
        ctx.add_metadata(
            "rate_limit",
            json!({
                "allowed": decision.allowed,
                "limit": decision.limit,
                "remaining": decision.remaining,
            }),
        );
        if !decision.allowed {
            ctx.add_metadata("denied_by", json!("rate_limit"));
            let mut response = ResponseEnvelope::new(429)
                .with_body(json!({"error": "rate limit exceeded"}));
            for (name, value) in decision.headers() {
                response = response.with_header(name, value);
            }
            return response;
        }

        // Stage 3: discovery. Errors here fail closed for this request.
        let session_id = envelope.header_value("x-session-id");
        let instance = match self
            .discovery
            .discover(&envelope.endpoint, session_id, Some(&envelope.ip_address))
            .await
        {
            Ok(instance) => instance,
            Err(err) => {
                ctx.add_metadata("denied_by", json!("discovery"));
                ctx.add_metadata("discovery_error", json!(err.to_string()));
                return ResponseEnvelope::new(503)
                    .with_body(json!({"error": "no upstream available"}));
            }
        };
        ctx.add_metadata(
            "discovered_instance",
            json!({ "id": instance.id, "url": instance.endpoint.url() }),
        );

        // Stages 4 and 5 run inside the custom-middleware onion: the core
        // is the circuit-gated handler dispatch.
        let breaker = self.breaker_for(&instance.name);
        let middlewares: Vec<Arc<dyn Middleware>> = self.middlewares.read().unwrap().clone();
        let core = HandlerCore {
            coordinator: self,
            envelope,
            breaker,
            handler,
        };
        let next = Next {
            middlewares: &middlewares,
            core: &core,
        };
        next.run(ctx).await
    }

    fn breaker_for(&self, service: &str) -> Arc<CircuitBreaker<Value, String>> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker;
        }
        self.breakers.add_breaker((self.circuit_factory)(service))
    }

    /// Capture a failed request into the DLQ. Submission failures are
    /// logged, never raised to the caller.
    async fn capture_to_dlq(
        &self,
        envelope: &RequestEnvelope,
        metadata: Value,
        reason: &str,
    ) {
        let original_queue = envelope
            .endpoint
            .trim_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("default");
        if let Err(_err) = self
            .dlq
            .enqueue(
                "default",
                original_queue,
                envelope.body.clone(),
                reason,
                metadata,
            )
            .await
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                request_id = %envelope.request_id,
                error = %_err,
                "failed to capture request into DLQ"
            );
        }
    }
}

struct HandlerCore<'c> {
    coordinator: &'c Coordinator,
    envelope: &'c RequestEnvelope,
    breaker: Arc<CircuitBreaker<Value, String>>,
    handler: &'c dyn RequestHandler,
}

impl Core for HandlerCore<'_> {
    fn call<'b>(&'b self, ctx: &'b mut MiddlewareContext) -> BoxFuture<'b, ResponseEnvelope> {
        Box::pin(async move {
            let outcome = self
                .breaker
                .call(|| async { self.handler.handle(self.envelope).await })
                .await;

            match outcome {
                Ok(value) => {
                    ctx.add_metadata("handler", json!("ok"));
                    ResponseEnvelope::new(200).with_body(value)
                }
                Err(CircuitBreakerError::Open {
                    retry_after,
                    fallback,
                    ..
                }) => {
                    ctx.add_metadata("circuit", json!("open"));
                    ctx.add_metadata("denied_by", json!("circuit"));
                    let metadata = ctx.metadata_json();
                    self.coordinator
                        .capture_to_dlq(self.envelope, metadata, "circuit open")
                        .await;
                    if let Some(value) = fallback {
                        ctx.add_metadata("circuit_fallback", json!(true));
                        return ResponseEnvelope::new(200).with_body(value);
                    }
                    ResponseEnvelope::new(503)
                        .with_header("Retry-After", retry_after.as_secs().max(1).to_string())
                        .with_body(json!({"error": "service temporarily unavailable"}))
                }
                Err(CircuitBreakerError::Backpressure { fallback, .. }) => {
                    ctx.add_metadata("circuit", json!("backpressure"));
                    ctx.add_metadata("denied_by", json!("circuit"));
                    let metadata = ctx.metadata_json();
                    self.coordinator
                        .capture_to_dlq(self.envelope, metadata, "backpressure")
                        .await;
                    if let Some(value) = fallback {
                        ctx.add_metadata("circuit_fallback", json!(true));
                        return ResponseEnvelope::new(200).with_body(value);
                    }
                    ResponseEnvelope::new(503)
                        .with_body(json!({"error": "service temporarily unavailable"}))
                }
                Err(CircuitBreakerError::Inner(error)) => {
                    ctx.add_metadata("handler_error", json!(error));
                    let metadata = ctx.metadata_json();
                    self.coordinator
                        .capture_to_dlq(self.envelope, metadata, &error)
                        .await;
                    ResponseEnvelope::new(500)
                        .with_body(json!({"error": "handler failure", "message": error}))
                }
            }
        })
    }
}

/// Assembles a [`Coordinator`] from explicitly-constructed subsystems.
/// Missing pieces are configuration errors and fail the process.
pub struct CoordinatorBuilder {
    health: Option<Arc<HealthMonitor>>,
    limiter: Option<Arc<RateLimiter>>,
    discovery: Option<Arc<ServiceDiscovery>>,
    dlq: Option<Arc<DeadLetterQueue>>,
    circuit_store: Option<gatehouse_core::SharedStore>,
    circuit_factory: Arc<CircuitFactory>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            health: None,
            limiter: None,
            discovery: None,
            dlq: None,
            circuit_store: None,
            circuit_factory: Arc::new(|service| {
                CircuitConfig::builder().name(service.to_string()).build()
            }),
        }
    }

    /// Mirror circuit state into the shared store so sibling processes
    /// agree on open/closed.
    pub fn circuit_store(mut self, store: gatehouse_core::SharedStore) -> Self {
        self.circuit_store = Some(store);
        self
    }

    pub fn health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn discovery(mut self, discovery: Arc<ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn dlq(mut self, dlq: Arc<DeadLetterQueue>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Circuit configuration applied to each upstream service on first use.
    pub fn circuit_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> CircuitConfig<Value, String> + Send + Sync + 'static,
    {
        self.circuit_factory = Arc::new(factory);
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            health: self.health.unwrap_or_else(|| panic!("coordinator requires a health monitor")),
            limiter: self
                .limiter
                .unwrap_or_else(|| panic!("coordinator requires a rate limiter")),
            discovery: self
                .discovery
                .unwrap_or_else(|| panic!("coordinator requires service discovery")),
            dlq: self.dlq.unwrap_or_else(|| panic!("coordinator requires a DLQ")),
            breakers: match self.circuit_store {
                Some(store) => CircuitBreakerGroup::with_store(store),
                None => CircuitBreakerGroup::new(),
            },
            circuit_factory: self.circuit_factory,
            middlewares: RwLock::new(Vec::new()),
        }
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
