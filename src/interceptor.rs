//! Interceptors
//!
//! An interceptor looks at the context before the handler runs and returns a
//! transform that is applied to the handler's object payload before it is
//! serialized.

use crate::context::Ctx;
use crate::middleware::{HttpResult, Middleware, Next};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Rewrites an outgoing object payload
pub type Transform = Box<dyn FnOnce(Map<String, Value>) -> Map<String, Value> + Send>;

pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, ctx: &Ctx) -> Transform;
}

impl<F> Interceptor for F
where
    F: Fn(&Ctx) -> Transform + Send + Sync + 'static,
{
    fn intercept(&self, ctx: &Ctx) -> Transform {
        self(ctx)
    }
}

/// Drops every top-level `null` field
#[derive(Debug, Clone, Copy, Default)]
pub struct StripNulls;

impl Interceptor for StripNulls {
    fn intercept(&self, _ctx: &Ctx) -> Transform {
        Box::new(|mut map| {
            map.retain(|_, v| !v.is_null());
            map
        })
    }
}

pub(crate) struct InterceptorLayer {
    interceptor: Arc<dyn Interceptor>,
}

impl InterceptorLayer {
    pub(crate) fn new(interceptor: Arc<dyn Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl Middleware for InterceptorLayer {
    fn handle(&self, ctx: &mut Ctx, next: Next<'_>) -> HttpResult {
        let transform = self.interceptor.intercept(ctx);
        next.run(ctx)?;

        // non-object payloads pass through untouched
        if let Some(Value::Object(map)) = ctx.response_mut().payload_mut() {
            let taken = std::mem::take(map);
            *map = transform(taken);
        }
        Ok(())
    }
}
