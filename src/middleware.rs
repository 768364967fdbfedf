//! Handler chains
//!
//! A route is an ordered list of middleware folded around one handler. Each
//! layer receives the context and a [`Next`] that runs the remainder; not
//! calling it short-circuits everything downstream.

use crate::context::Ctx;
use crate::exception::HttpException;
use std::fmt;
use std::sync::Arc;

/// Result of a handler or middleware
pub type HttpResult<T = ()> = Result<T, HttpException>;

/// Terminal route handler
pub type Handler = Arc<dyn Fn(&mut Ctx) -> HttpResult + Send + Sync>;

/// A layer wrapped around the downstream chain
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, ctx: &mut Ctx, next: Next<'_>) -> HttpResult;
}

impl<F> Middleware for F
where
    F: Fn(&mut Ctx, Next<'_>) -> HttpResult + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, ctx: &mut Ctx, next: Next<'_>) -> HttpResult {
        self(ctx, next)
    }
}

/// Build a middleware from a closure, fixing its signature for inference.
///
/// ```rust
/// use trellis::middleware;
///
/// let log = middleware::from_fn(|ctx, next| {
///     ctx.set("seen", true);
///     next.run(ctx)
/// });
/// # let _ = log;
/// ```
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&mut Ctx, Next<'_>) -> HttpResult + Send + Sync + 'static,
{
    f
}

/// The remainder of a chain
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    endpoint: &'a Handler,
}

impl<'a> Next<'a> {
    /// Run the next layer, or the handler when no layers remain
    pub fn run(self, ctx: &mut Ctx) -> HttpResult {
        match self.rest.split_first() {
            Some((layer, rest)) => layer.handle(
                ctx,
                Next {
                    rest,
                    endpoint: self.endpoint,
                },
            ),
            None => (self.endpoint)(ctx),
        }
    }
}

/// Layers in outermost-first order plus the handler they wrap
#[derive(Clone)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
    endpoint: Handler,
}

impl Chain {
    pub fn new(layers: Vec<Arc<dyn Middleware>>, endpoint: Handler) -> Self {
        Self { layers, endpoint }
    }

    pub fn run(&self, ctx: &mut Ctx) -> HttpResult {
        Next {
            rest: &self.layers,
            endpoint: &self.endpoint,
        }
        .run(ctx)
    }

    /// Number of layers, excluding the handler
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("depth", &self.depth()).finish()
    }
}
