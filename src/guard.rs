//! Guards
//!
//! A guard is a predicate over the request and the module or controller that
//! declared it. The first guard returning `false` ends the request with 403;
//! nothing downstream runs.

use crate::context::Ctx;
use crate::exception::HttpException;
use crate::graph::ModuleId;
use crate::middleware::{HttpResult, Middleware, Next};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Message of the 403 produced by a failed guard
pub const FORBIDDEN_MESSAGE: &str = "you can not access";

/// Whether a guard was declared on a module or on a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOwner {
    Module,
    Controller,
}

/// The module or controller a guard was declared on
#[derive(Debug, Clone)]
pub struct GuardRef {
    owner: GuardOwner,
    name: Arc<str>,
    module: ModuleId,
}

impl GuardRef {
    pub(crate) fn new(owner: GuardOwner, name: &str, module: ModuleId) -> Self {
        Self {
            owner,
            name: Arc::from(name),
            module,
        }
    }

    #[inline]
    pub fn owner(&self) -> GuardOwner {
        self.owner
    }

    /// Module or controller name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module owning the route being guarded
    #[inline]
    pub fn module(&self) -> ModuleId {
        self.module
    }
}

pub trait Guard: Send + Sync + 'static {
    fn can_activate(&self, owner: &GuardRef, ctx: &mut Ctx) -> bool;
}

impl<F> Guard for F
where
    F: Fn(&GuardRef, &mut Ctx) -> bool + Send + Sync + 'static,
{
    #[inline]
    fn can_activate(&self, owner: &GuardRef, ctx: &mut Ctx) -> bool {
        self(owner, ctx)
    }
}

/// Build a guard from a closure, fixing its signature for inference
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&GuardRef, &mut Ctx) -> bool + Send + Sync + 'static,
{
    f
}

/// Guards bound to their owners, run in order as one chain layer
pub(crate) struct GuardLayer {
    guards: Vec<(GuardRef, Arc<dyn Guard>)>,
}

impl GuardLayer {
    pub(crate) fn new(guards: Vec<(GuardRef, Arc<dyn Guard>)>) -> Self {
        Self { guards }
    }
}

impl Middleware for GuardLayer {
    fn handle(&self, ctx: &mut Ctx, next: Next<'_>) -> HttpResult {
        for (owner, guard) in &self.guards {
            if !guard.can_activate(owner, ctx) {
                #[cfg(feature = "logging")]
                debug!(
                    target: "trellis",
                    guard_owner = owner.name(),
                    path = ctx.path(),
                    "Guard rejected request"
                );
                return Err(HttpException::forbidden(FORBIDDEN_MESSAGE));
            }
        }
        next.run(ctx)
    }
}

impl fmt::Debug for GuardLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardLayer")
            .field("guards", &self.guards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_ctx;
    use crate::http::Request;
    use crate::middleware::{Chain, Handler};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn has_key(_: &GuardRef, ctx: &mut Ctx) -> bool {
        ctx.query("key").is_some()
    }

    #[test]
    fn test_rejecting_guard_stops_chain() {
        static REACHED: AtomicBool = AtomicBool::new(false);

        let owner = GuardRef::new(GuardOwner::Controller, "users", ModuleId(0));
        let layer = GuardLayer::new(vec![(owner, Arc::new(has_key) as Arc<dyn Guard>)]);
        let handler: Handler = Arc::new(|_ctx: &mut Ctx| {
            REACHED.store(true, Ordering::SeqCst);
            Ok(())
        });
        let chain = Chain::new(vec![Arc::new(layer)], handler);

        let mut ctx = test_ctx(Request::new("GET", "/users"));
        let err = chain.run(&mut ctx).unwrap_err();
        assert_eq!(err, HttpException::forbidden(FORBIDDEN_MESSAGE));
        assert!(!REACHED.load(Ordering::SeqCst));

        let mut ctx = test_ctx(Request::new("GET", "/users?key=1"));
        chain.run(&mut ctx).unwrap();
        assert!(REACHED.load(Ordering::SeqCst));
    }

    #[test]
    fn test_guard_sees_owner() {
        let guard = from_fn(|owner, _ctx| {
            owner.owner() == GuardOwner::Module && owner.name() == "admin"
        });
        let owner = GuardRef::new(GuardOwner::Module, "admin", ModuleId(2));
        let mut ctx = test_ctx(Request::new("GET", "/"));

        assert!(guard.can_activate(&owner, &mut ctx));
        assert_eq!(owner.module(), ModuleId(2));
    }
}
