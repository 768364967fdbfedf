//! Route definitions, chain composition and the path table

use crate::context::Metadata;
use crate::error::{Error, Result};
use crate::graph::ModuleId;
use crate::guard::{Guard, GuardLayer, GuardOwner, GuardRef};
use crate::interceptor::{Interceptor, InterceptorLayer};
use crate::middleware::{Chain, Handler, Middleware};
use crate::pipe::{Pipe, PipeLayer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A route as registered by a controller, before composition
#[derive(Clone)]
pub(crate) struct RouteDef {
    pub(crate) method: String,
    /// Controller name joined with the route path, without the global prefix
    pub(crate) path: String,
    pub(crate) version: Option<String>,
    pub(crate) controller: Arc<str>,
    pub(crate) module: ModuleId,
    pub(crate) controller_middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) consumer_middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
    pub(crate) pipes: Vec<Arc<dyn Pipe>>,
    pub(crate) interceptor: Option<Arc<dyn Interceptor>>,
    pub(crate) metadata: Metadata,
    pub(crate) handler: Handler,
}

impl fmt::Debug for RouteDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDef")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("module", &self.module)
            .finish()
    }
}

/// Module-level layers a route inherits from its owning module
pub(crate) struct ModuleLayers<'a> {
    pub(crate) lifecycle: Option<Arc<dyn Middleware>>,
    pub(crate) middlewares: &'a [Arc<dyn Middleware>],
    pub(crate) guards: &'a [(GuardRef, Arc<dyn Guard>)],
}

/// Fold a route into one chain. Outermost first:
/// lifecycle, module middleware, controller middleware (consumer-spliced
/// first), guards, pipes, interceptor, handler.
pub(crate) fn compose(route: &RouteDef, module: ModuleLayers<'_>) -> Chain {
    let mut layers: Vec<Arc<dyn Middleware>> = Vec::new();

    layers.extend(module.lifecycle);
    layers.extend(module.middlewares.iter().cloned());
    layers.extend(route.consumer_middlewares.iter().cloned());
    layers.extend(route.controller_middlewares.iter().cloned());

    let owner = GuardRef::new(GuardOwner::Controller, &route.controller, route.module);
    let guards: Vec<(GuardRef, Arc<dyn Guard>)> = module
        .guards
        .iter()
        .cloned()
        .chain(route.guards.iter().map(|g| (owner.clone(), Arc::clone(g))))
        .collect();
    if !guards.is_empty() {
        layers.push(Arc::new(GuardLayer::new(guards)));
    }

    if !route.pipes.is_empty() {
        layers.push(Arc::new(PipeLayer::new(route.pipes.clone())));
    }

    if let Some(interceptor) = &route.interceptor {
        layers.push(Arc::new(InterceptorLayer::new(Arc::clone(interceptor))));
    }

    Chain::new(layers, Arc::clone(&route.handler))
}

/// Join path pieces into `/a/b`, collapsing empty segments. The empty path
/// is `/`.
pub fn join_path<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in parts.into_iter().flat_map(|p| p.split('/')) {
        if !segment.is_empty() {
            out.push('/');
            out.push_str(segment);
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
}

fn parse_pattern(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Segment::Param(name.to_string())
            } else {
                Segment::Static(s.to_string())
            }
        })
        .collect()
}

/// A composed, dispatchable route
pub(crate) struct Endpoint {
    pub(crate) version: Option<String>,
    pub(crate) module: ModuleId,
    pub(crate) metadata: Arc<Metadata>,
    pub(crate) chain: Chain,
}

/// Every version of one method and path
pub(crate) struct RouteGroup {
    pub(crate) method: String,
    pub(crate) path: String,
    pattern: Vec<Segment>,
    pub(crate) endpoints: Vec<Endpoint>,
}

impl RouteGroup {
    fn is_static(&self) -> bool {
        self.pattern.iter().all(|s| matches!(s, Segment::Static(_)))
    }

    fn capture(&self, segments: &[&str]) -> Option<HashMap<String, String>> {
        if segments.len() != self.pattern.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (pattern, actual) in self.pattern.iter().zip(segments) {
            match pattern {
                Segment::Static(expected) if expected == actual => {}
                Segment::Static(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }
}

/// Path table grouping same-path routes by version
#[derive(Default)]
pub(crate) struct Router {
    groups: Vec<RouteGroup>,
}

impl Router {
    pub(crate) fn insert(&mut self, method: &str, path: &str, endpoint: Endpoint) -> Result<()> {
        let group = match self
            .groups
            .iter_mut()
            .position(|g| g.method == method && g.path == path)
        {
            Some(idx) => &mut self.groups[idx],
            None => {
                self.groups.push(RouteGroup {
                    method: method.to_string(),
                    path: path.to_string(),
                    pattern: parse_pattern(path),
                    endpoints: Vec::new(),
                });
                let last = self.groups.len() - 1;
                &mut self.groups[last]
            }
        };

        if group.endpoints.iter().any(|e| e.version == endpoint.version) {
            return Err(Error::DuplicateRoute {
                method: method.to_string(),
                path: path.to_string(),
                version: endpoint.version.unwrap_or_else(|| "none".to_string()),
            });
        }

        group.endpoints.push(endpoint);
        Ok(())
    }

    /// Match a method and concrete path. Static routes win over
    /// parameterized ones.
    pub(crate) fn find(&self, method: &str, path: &str) -> Option<(&RouteGroup, HashMap<String, String>)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let candidates = self.groups.iter().filter(|g| g.method == method);

        let (statics, dynamics): (Vec<_>, Vec<_>) = candidates.partition(|g| g.is_static());
        statics
            .into_iter()
            .chain(dynamics)
            .find_map(|g| g.capture(&segments).map(|params| (g, params)))
    }

    pub(crate) fn groups(&self) -> &[RouteGroup] {
        &self.groups
    }
}

/// A registered route, as reported by [`Dispatcher::routes`](crate::Dispatcher::routes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Ctx, test_ctx};
    use crate::http::Request;
    use crate::middleware::{HttpResult, Next, from_fn};
    use std::sync::Mutex;

    fn endpoint(version: Option<&str>) -> Endpoint {
        let handler: Handler = Arc::new(|_ctx: &mut Ctx| Ok(()));
        Endpoint {
            version: version.map(str::to_string),
            module: ModuleId(0),
            metadata: Arc::new(Metadata::new()),
            chain: Chain::new(Vec::new(), handler),
        }
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(["api", "/users/", "{id}"]), "/api/users/{id}");
        assert_eq!(join_path(["", "/"]), "/");
        assert_eq!(join_path(["/a//b"]), "/a/b");
    }

    #[test]
    fn test_router_params_and_priority() {
        let mut router = Router::default();
        router.insert("GET", "/users/{id}", endpoint(None)).unwrap();
        router.insert("GET", "/users/me", endpoint(None)).unwrap();
        router.insert("GET", "/posts/:slug", endpoint(None)).unwrap();

        let (group, params) = router.find("GET", "/users/me").unwrap();
        assert_eq!(group.path, "/users/me");
        assert!(params.is_empty());

        let (group, params) = router.find("GET", "/users/42").unwrap();
        assert_eq!(group.path, "/users/{id}");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        let (_, params) = router.find("GET", "/posts/hello").unwrap();
        assert_eq!(params.get("slug").map(String::as_str), Some("hello"));

        assert!(router.find("POST", "/users/42").is_none());
        assert!(router.find("GET", "/users/42/extra").is_none());
    }

    #[test]
    fn test_duplicate_route() {
        let mut router = Router::default();
        router.insert("GET", "/a", endpoint(Some("1"))).unwrap();
        router.insert("GET", "/a", endpoint(Some("2"))).unwrap();

        let err = router.insert("GET", "/a", endpoint(Some("1"))).unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { .. }));
        assert_eq!(router.groups()[0].endpoints.len(), 2);
    }

    #[test]
    fn test_compose_order() {
        static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

        fn record(name: &'static str) -> Arc<dyn Middleware> {
            Arc::new(from_fn(move |ctx: &mut Ctx, next: Next<'_>| -> HttpResult {
                ORDER.lock().unwrap().push(name);
                next.run(ctx)
            }))
        }

        let route = RouteDef {
            method: "GET".into(),
            path: "/".into(),
            version: None,
            controller: Arc::from("root"),
            module: ModuleId(0),
            controller_middlewares: vec![record("controller")],
            consumer_middlewares: vec![record("consumer")],
            guards: vec![Arc::new(|_: &GuardRef, _: &mut Ctx| {
                ORDER.lock().unwrap().push("guard");
                true
            }) as Arc<dyn Guard>],
            pipes: Vec::new(),
            interceptor: None,
            metadata: Metadata::new(),
            handler: Arc::new(|_ctx: &mut Ctx| {
                ORDER.lock().unwrap().push("handler");
                Ok(())
            }),
        };
        let module_mw = vec![record("module")];
        let chain = compose(
            &route,
            ModuleLayers {
                lifecycle: None,
                middlewares: &module_mw,
                guards: &[],
            },
        );

        chain.run(&mut test_ctx(Request::new("GET", "/"))).unwrap();
        assert_eq!(
            *ORDER.lock().unwrap(),
            vec!["module", "consumer", "controller", "guard", "handler"]
        );
    }
}
