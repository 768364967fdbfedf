//! Controllers
//!
//! A controller groups routes under its name as a base path. Middleware
//! added with [`Controller::use_middleware`] applies to every route
//! registered after it. Version, guards, pipes, interceptor and metadata
//! apply to the next registered route only and are then reset.
//!
//! # Examples
//!
//! ```rust
//! use trellis::{Controller, interceptor::StripNulls};
//! use serde_json::json;
//!
//! let cats = Controller::new("cats")
//!     .version("1")
//!     .interceptor(StripNulls)
//!     .get("", |ctx| ctx.json(json!({"data": "v1", "extra": null})))
//!     .version("2")
//!     .get("", |ctx| ctx.json(json!({"data": "v2"})));
//! # let _ = cats;
//! ```

use crate::context::{Ctx, Metadata};
use crate::graph::ModuleId;
use crate::guard::Guard;
use crate::interceptor::Interceptor;
use crate::middleware::{Handler, HttpResult, Middleware};
use crate::pipe::Pipe;
use crate::route::{RouteDef, join_path};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Per-route settings, reset after each registration
#[derive(Clone, Default)]
struct Pending {
    version: Option<String>,
    guards: Vec<Arc<dyn Guard>>,
    pipes: Vec<Arc<dyn Pipe>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    metadata: Metadata,
}

/// A reusable bundle of guards, pipes and metadata
///
/// ```rust
/// use trellis::{Composition, guard};
///
/// let admin_only = Composition::new()
///     .guard(guard::from_fn(|_, ctx| ctx.header("x-role") == Some("admin")))
///     .metadata("roles", "admin");
/// # let _ = admin_only;
/// ```
#[derive(Clone, Default)]
pub struct Composition {
    guards: Vec<Arc<dyn Guard>>,
    pipes: Vec<Arc<dyn Pipe>>,
    metadata: Metadata,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard<G: Guard>(mut self, guard: G) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn pipe<P: Pipe>(mut self, pipe: P) -> Self {
        self.pipes.push(Arc::new(pipe));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composition")
            .field("guards", &self.guards.len())
            .field("pipes", &self.pipes.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[derive(Clone)]
pub struct Controller {
    name: Arc<str>,
    middlewares: Vec<Arc<dyn Middleware>>,
    pending: Pending,
    routes: Vec<RouteDef>,
}

impl Controller {
    /// A controller whose routes live under `/name`
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            middlewares: Vec::new(),
            pending: Pending::default(),
            routes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Middleware for every route registered from now on
    pub fn use_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Version tag of the next route
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.pending.version = Some(version.into());
        self
    }

    /// Guard on the next route
    pub fn guard<G: Guard>(mut self, guard: G) -> Self {
        self.pending.guards.push(Arc::new(guard));
        self
    }

    /// Pipe on the next route
    pub fn pipe<P: Pipe>(mut self, pipe: P) -> Self {
        self.pending.pipes.push(Arc::new(pipe));
        self
    }

    /// Interceptor on the next route, replacing any previous one
    pub fn interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.pending.interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Metadata on the next route, readable with [`Ctx::metadata`]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pending.metadata.insert(key.into(), value.into());
        self
    }

    /// Apply a bundle of guards, pipes and metadata to the next route
    pub fn composition(mut self, composition: &Composition) -> Self {
        self.pending.guards.extend(composition.guards.iter().cloned());
        self.pending.pipes.extend(composition.pipes.iter().cloned());
        for (key, value) in &composition.metadata {
            self.pending.metadata.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn get<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Ctx) -> HttpResult + Send + Sync + 'static,
    {
        self.route("GET", path, handler)
    }

    pub fn post<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Ctx) -> HttpResult + Send + Sync + 'static,
    {
        self.route("POST", path, handler)
    }

    pub fn put<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Ctx) -> HttpResult + Send + Sync + 'static,
    {
        self.route("PUT", path, handler)
    }

    pub fn patch<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Ctx) -> HttpResult + Send + Sync + 'static,
    {
        self.route("PATCH", path, handler)
    }

    pub fn delete<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Ctx) -> HttpResult + Send + Sync + 'static,
    {
        self.route("DELETE", path, handler)
    }

    fn route<H>(mut self, method: &str, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Ctx) -> HttpResult + Send + Sync + 'static,
    {
        let pending = std::mem::take(&mut self.pending);
        let handler: Handler = Arc::new(handler);

        self.routes.push(RouteDef {
            method: method.to_string(),
            path: join_path([&*self.name, path]),
            version: pending.version,
            controller: Arc::clone(&self.name),
            // assigned when the owning module registers the controller
            module: ModuleId(0),
            controller_middlewares: self.middlewares.clone(),
            consumer_middlewares: Vec::new(),
            guards: pending.guards,
            pipes: pending.pipes,
            interceptor: pending.interceptor,
            metadata: pending.metadata,
            handler,
        });
        self
    }

    /// Routes registered so far, bound to `module`
    pub(crate) fn routes_for(&self, module: ModuleId) -> impl Iterator<Item = RouteDef> + '_ {
        self.routes.iter().cloned().map(move |mut route| {
            route.module = module;
            route
        })
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("routes", &self.routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::GuardRef;

    fn ok(_ctx: &mut Ctx) -> HttpResult {
        Ok(())
    }

    fn allow(_: &GuardRef, _: &mut Ctx) -> bool {
        true
    }

    #[test]
    fn test_paths_under_controller_name() {
        let ctrl = Controller::new("users").get("", ok).get("{id}", ok).post("/", ok);

        let paths: Vec<_> = ctrl
            .routes_for(ModuleId(1))
            .map(|r| (r.method, r.path, r.module))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("GET".to_string(), "/users".to_string(), ModuleId(1)),
                ("GET".to_string(), "/users/{id}".to_string(), ModuleId(1)),
                ("POST".to_string(), "/users".to_string(), ModuleId(1)),
            ]
        );
    }

    #[test]
    fn test_per_route_settings_reset() {
        let ctrl = Controller::new("cats")
            .version("1")
            .guard(allow)
            .metadata("roles", "admin")
            .get("a", ok)
            .get("b", ok);

        let routes: Vec<_> = ctrl.routes_for(ModuleId(0)).collect();
        assert_eq!(routes[0].version.as_deref(), Some("1"));
        assert_eq!(routes[0].guards.len(), 1);
        assert_eq!(routes[0].metadata.get("roles"), Some(&Value::from("admin")));

        assert!(routes[1].version.is_none());
        assert!(routes[1].guards.is_empty());
        assert!(routes[1].metadata.is_empty());
    }

    #[test]
    fn test_middleware_applies_to_later_routes() {
        let mw = crate::middleware::from_fn(|ctx, next| next.run(ctx));
        let ctrl = Controller::new("x").get("before", ok).use_middleware(mw).get("after", ok);

        let routes: Vec<_> = ctrl.routes_for(ModuleId(0)).collect();
        assert!(routes[0].controller_middlewares.is_empty());
        assert_eq!(routes[1].controller_middlewares.len(), 1);
    }

    #[test]
    fn test_composition() {
        let bundle = Composition::new().guard(allow).metadata("public", true);
        let ctrl = Controller::new("x").composition(&bundle).get("", ok);

        let route = ctrl.routes_for(ModuleId(0)).next().unwrap();
        assert_eq!(route.guards.len(), 1);
        assert_eq!(route.metadata.get("public"), Some(&Value::Bool(true)));
    }
}
