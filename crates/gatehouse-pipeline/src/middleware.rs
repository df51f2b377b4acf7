//! Custom middleware support.
//!
//! Registered middlewares run after the built-in stages, wrapping the
//! business handler in onion order: each receives the context and a
//! [`Next`] continuation it must invoke (or short-circuit).

use crate::context::{MiddlewareContext, ResponseEnvelope};
use futures::future::BoxFuture;
use std::sync::Arc;

/// The innermost step of the onion: the circuit-gated handler dispatch.
pub(crate) trait Core: Send + Sync {
    fn call<'b>(&'b self, ctx: &'b mut MiddlewareContext) -> BoxFuture<'b, ResponseEnvelope>;
}

/// A user-registered middleware.
pub trait Middleware: Send + Sync {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, ResponseEnvelope>;
}

/// Continuation into the rest of the chain.
pub struct Next<'a> {
    pub(crate) middlewares: &'a [Arc<dyn Middleware>],
    pub(crate) core: &'a (dyn Core + 'a),
}

impl<'a> Next<'a> {
    /// Run the remainder of the chain.
    pub fn run<'b>(self, ctx: &'b mut MiddlewareContext) -> BoxFuture<'b, ResponseEnvelope>
    where
        'a: 'b,
    {
        match self.middlewares.split_first() {
            Some((middleware, rest)) => middleware.handle(
                ctx,
                Next {
                    middlewares: rest,
                    core: self.core,
                },
            ),
            None => self.core.call(ctx),
        }
    }
}
