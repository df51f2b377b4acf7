//! The middleware coordinator.
//!
//! Every request traverses an ordered, short-circuiting pipeline:
//!
//! 1. Health gate: not serviceable means 503 with diagnostics.
//! 2. Rate limit: denied means 429 with the normative headers.
//! 3. Discovery: no healthy instance means 503.
//! 4. Circuit gate: open means the envelope is captured to the DLQ and
//!    the response is 503 with `Retry-After`.
//! 5. Handler dispatch: handler failures are captured to the DLQ and
//!    surfaced as 500.
//!
//! Each stage annotates the request context's metadata; the context lives
//! only for the request. Custom middlewares run after the built-in stages
//! in onion order around the handler. Every response carries
//! `X-Request-Id`.
//!
//! Construction is explicit: the coordinator is assembled from
//! already-built subsystems, so dependency order is visible at startup.

mod context;
mod coordinator;
mod error;
mod middleware;

pub use context::{MiddlewareContext, RequestEnvelope, ResponseEnvelope};
pub use coordinator::{Coordinator, CoordinatorBuilder, RequestHandler};
pub use error::PipelineError;
pub use middleware::{Middleware, Next};
