//! Application assembly and request dispatch
//!
//! [`App`] collects options around a root module constructor.
//! [`App::build`] wires the module graph, runs `on_init` hooks and composes
//! every route into a [`Dispatcher`], which turns a [`Request`] into a
//! [`Response`].
//!
//! # Examples
//!
//! ```rust
//! use trellis::{App, Controller, Module, Request};
//! use serde_json::json;
//!
//! fn app() -> Module {
//!     Module::new("app").controller(
//!         Controller::new("hello").get("", |ctx| ctx.json(json!({"hello": "world"}))),
//!     )
//! }
//!
//! let dispatcher = App::new(app).set_global_prefix("api").build().unwrap();
//!
//! let res = dispatcher.handle(Request::new("GET", "/api/hello"));
//! assert_eq!(res.status(), 200);
//! assert_eq!(res.text(), r#"{"hello":"world"}"#);
//!
//! let res = dispatcher.handle(Request::new("GET", "/api"));
//! assert_eq!(res.text(), "API is running");
//! ```

use crate::builder::{self, Blueprint};
use crate::context::Ctx;
use crate::error::Result;
use crate::exception::HttpException;
use crate::graph::{ModuleGraph, ModuleId};
use crate::http::{Request, Response, Serializer};
use crate::middleware::Middleware;
use crate::module::{Import, Module, ModuleHook, ModuleRef};
use crate::provider::Lifetime;
use crate::route::{self, Endpoint, ModuleLayers, RouteInfo, Router};
use crate::scope::RequestLifecycle;
use crate::version::{self, Selection, VERSION_NOT_FOUND, VersionOptions};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(feature = "logging")]
use tracing::{debug, error, trace, warn};

/// Body of the health route answering at the bare prefix
pub const HEALTH_MESSAGE: &str = "API is running";

/// Message of the 503 produced when a request exceeds its timeout
pub const TIMEOUT_MESSAGE: &str = "request timeout";

/// An unexpected failure caught at the dispatch boundary
#[derive(Debug, Clone)]
pub struct Failure {
    pub path: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Shapes the response for a [`Failure`]
pub type ErrorHandler = Arc<dyn Fn(&Failure, &mut Response) + Send + Sync>;

/// Shapes the response when no route matches
pub type NotFoundHandler = Arc<dyn Fn(&Request, &mut Response) + Send + Sync>;

/// `{"statusCode": 500, "timestamp": <RFC3339>, "path": ..}`
pub fn default_error_handler(failure: &Failure, res: &mut Response) {
    res.set_status(500);
    res.set_payload(json!({
        "statusCode": 500,
        "timestamp": failure.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        "path": failure.path,
    }));
}

/// 404 with `{"error": "not found: <path>"}`
pub fn default_not_found_handler(req: &Request, res: &mut Response) {
    HttpException::not_found(format!("not found: {}", req.path())).write_to(res);
}

/// Application-wide options
#[derive(Clone)]
pub struct AppOptions {
    prefix: String,
    versioning: Option<VersionOptions>,
    timeout: Option<Duration>,
    serializer: Serializer,
    error_handler: ErrorHandler,
    not_found_handler: NotFoundHandler,
    before_shutdown: Vec<ModuleHook>,
    after_shutdown: Vec<ModuleHook>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            versioning: None,
            timeout: None,
            serializer: Serializer::default(),
            error_handler: Arc::new(default_error_handler),
            not_found_handler: Arc::new(default_not_found_handler),
            before_shutdown: Vec::new(),
            after_shutdown: Vec::new(),
        }
    }
}

impl AppOptions {
    /// Normalized global prefix, empty when unset
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn versioning(&self) -> Option<&VersionOptions> {
        self.versioning.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("prefix", &self.prefix)
            .field("versioning", &self.versioning)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct App {
    root: Import,
    options: AppOptions,
}

impl App {
    pub fn new<F>(root: F) -> Self
    where
        F: Fn() -> Module + Send + Sync + 'static,
    {
        Self {
            root: Import::new(root),
            options: AppOptions::default(),
        }
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Prefix prepended to every route, e.g. `api`
    pub fn set_global_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.options.prefix = route::join_path([prefix.as_ref()]);
        if self.options.prefix == "/" {
            self.options.prefix.clear();
        }
        self
    }

    pub fn enable_versioning(mut self, options: VersionOptions) -> Self {
        self.options.versioning = Some(options);
        self
    }

    /// Abandon requests running longer than `limit` with a 503.
    /// Applies to [`Dispatcher::dispatch`].
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.options.timeout = Some(limit);
        self
    }

    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.options.serializer = serializer;
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Failure, &mut Response) + Send + Sync + 'static,
    {
        self.options.error_handler = Arc::new(handler);
        self
    }

    pub fn not_found_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.options.not_found_handler = Arc::new(handler);
        self
    }

    /// Run on [`Dispatcher::shutdown`], before the `after_shutdown` hooks
    pub fn before_shutdown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ModuleRef<'_>) + Send + Sync + 'static,
    {
        self.options.before_shutdown.push(Arc::new(hook));
        self
    }

    pub fn after_shutdown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ModuleRef<'_>) + Send + Sync + 'static,
    {
        self.options.after_shutdown.push(Arc::new(hook));
        self
    }

    /// Build the module graph and the route table.
    ///
    /// Every configuration error surfaces here: duplicate providers, unknown
    /// exports, import or dependency cycles, malformed versioning and
    /// duplicate routes.
    pub fn build(self) -> Result<Dispatcher> {
        if let Some(versioning) = &self.options.versioning {
            versioning.validate()?;
        }

        let Blueprint {
            graph,
            layers,
            routes,
        } = builder::build(&self.root)?;
        let graph = Arc::new(graph);

        for id in graph.modules() {
            for hook in &layers[id.index()].hooks {
                hook(&ModuleRef::new(&graph, id));
            }
        }

        let lifecycles: Vec<Option<Arc<dyn Middleware>>> =
            graph.modules().map(|id| lifecycle_for(&graph, id)).collect();

        let mut router = Router::default();
        let mut versions = HashSet::new();
        for def in &routes {
            let module = &layers[def.module.index()];
            let chain = route::compose(
                def,
                ModuleLayers {
                    lifecycle: lifecycles[def.module.index()].clone(),
                    middlewares: &module.middlewares,
                    guards: &module.guards,
                },
            );

            let path = route::join_path([self.options.prefix.as_str(), def.path.as_str()]);
            if let Some(version) = &def.version {
                versions.insert(version.clone());
            }

            router.insert(
                &def.method,
                &path,
                Endpoint {
                    version: def.version.clone(),
                    module: def.module,
                    metadata: Arc::new(def.metadata.clone()),
                    chain,
                },
            )?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "trellis",
            modules = graph.len(),
            routes = routes.len(),
            prefix = %self.options.prefix,
            "Application ready"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                graph,
                router,
                versions,
                options: self.options,
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

/// A request scope opens on routes of Request modules and of modules that can
/// see a Request provider. Request modules also warm their own Request
/// providers.
fn lifecycle_for(graph: &ModuleGraph, id: ModuleId) -> Option<Arc<dyn Middleware>> {
    let is_request_module = graph.lifetime(id) == Some(Lifetime::Request);
    let sees_request = graph
        .visible_entries(id)
        .iter()
        .any(|entry| entry.lifetime() == Lifetime::Request);

    if !is_request_module && !sees_request {
        return None;
    }

    let warm = match graph.node(id) {
        Some(node) if is_request_module => node
            .storage
            .entries()
            .filter(|entry| entry.owner() == id && entry.lifetime() == Lifetime::Request)
            .map(|entry| entry.name().clone())
            .collect(),
        _ => Vec::new(),
    };

    Some(Arc::new(RequestLifecycle::new(id, warm)))
}

struct Inner {
    graph: Arc<ModuleGraph>,
    router: Router,
    /// Every declared version tag, for URI segment stripping
    versions: HashSet<String>,
    options: AppOptions,
    shut_down: AtomicBool,
}

/// The built application. Cheap to clone; all clones share one graph.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.inner.graph
    }

    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    /// Registered routes in registration order, prefix included
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.inner
            .router
            .groups()
            .iter()
            .flat_map(|group| {
                group.endpoints.iter().map(move |endpoint| RouteInfo {
                    method: group.method.clone(),
                    path: group.path.clone(),
                    version: endpoint.version.clone(),
                })
            })
            .collect()
    }

    /// Run one request to completion on the calling thread.
    ///
    /// This is the recovery boundary: a panic anywhere in the chain becomes
    /// a 500 shaped by the error handler, and request teardown still runs.
    pub fn handle(&self, mut request: Request) -> Response {
        let inner = &*self.inner;

        #[cfg(feature = "logging")]
        trace!(
            target: "trellis",
            method = request.method(),
            path = request.path(),
            "Dispatching request"
        );

        let (token, path) = match &inner.options.versioning {
            Some(versioning) => versioning.extract(&request, &inner.versions),
            None => (String::new(), request.path().to_string()),
        };

        let Some((group, params)) = inner.router.find(request.method(), &path) else {
            return self.fallback(&request, &path);
        };

        let endpoint = match version::select(&group.endpoints, &token) {
            Selection::Dispatch(endpoint) => endpoint,
            Selection::VersionNotFound => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "trellis",
                    route = %group.path,
                    version = %token,
                    "No route for requested version"
                );
                return self.exception_response(HttpException::internal(VERSION_NOT_FOUND));
            }
        };

        request.set_params(params);
        let request = Arc::new(request);
        let mut ctx = Ctx::new(
            Arc::clone(&request),
            Arc::clone(&inner.graph),
            endpoint.module,
            Arc::clone(&endpoint.metadata),
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| endpoint.chain.run(&mut ctx)));
        let response = match outcome {
            Ok(Ok(())) => ctx.into_response(),
            Ok(Err(exception)) if exception.is_unexpected() => {
                self.recover(&request, exception.message, "Unexpected error in request chain")
            }
            Ok(Err(exception)) => {
                let mut res = ctx.into_response();
                exception.write_to(&mut res);
                res
            }
            Err(panic) => self.recover(
                &request,
                panic_message(panic.as_ref()),
                "Recovered from panic in request chain",
            ),
        };

        self.finish(response)
    }

    /// Run one request on the blocking pool, honoring the configured
    /// timeout. A timed-out chain is abandoned, not interrupted: it keeps
    /// running in the background and its result is discarded.
    #[cfg(feature = "async")]
    pub async fn dispatch(&self, request: Request) -> Response {
        let this = self.clone();
        let task = tokio::task::spawn_blocking(move || this.handle(request));

        let joined = match self.inner.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    #[cfg(feature = "logging")]
                    warn!(
                        target: "trellis",
                        timeout_ms = limit.as_millis() as u64,
                        "Request exceeded timeout"
                    );
                    return self.exception_response(HttpException::service_unavailable(TIMEOUT_MESSAGE));
                }
            },
            None => task.await,
        };

        joined.unwrap_or_else(|err| self.exception_response(HttpException::internal(err.to_string())))
    }

    /// Run the shutdown hooks against the root module. Only the first call
    /// has an effect.
    pub fn shutdown(&self) {
        let inner = &*self.inner;
        if inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        debug!(target: "trellis", "Running shutdown hooks");

        let root = ModuleRef::new(&inner.graph, inner.graph.root());
        for hook in inner
            .options
            .before_shutdown
            .iter()
            .chain(&inner.options.after_shutdown)
        {
            hook(&root);
        }
    }

    fn fallback(&self, request: &Request, path: &str) -> Response {
        let mut res = Response::new();
        let health = route::join_path([self.inner.options.prefix.as_str()]);
        if request.method() == "GET" && path == health {
            res.set_header("content-type", "text/plain; charset=utf-8");
            res.write(HEALTH_MESSAGE);
        } else {
            (self.inner.options.not_found_handler)(request, &mut res);
        }
        self.finish(res)
    }

    /// Log a failure and let the error handler shape the response
    fn recover(&self, request: &Request, message: String, _event: &str) -> Response {
        let failure = Failure {
            path: request.path().to_string(),
            message,
            timestamp: Utc::now(),
        };

        #[cfg(feature = "logging")]
        error!(
            target: "trellis",
            method = request.method(),
            path = %failure.path,
            error = %failure.message,
            "{}",
            _event
        );

        let mut res = Response::new();
        (self.inner.options.error_handler)(&failure, &mut res);
        res
    }

    fn exception_response(&self, exception: HttpException) -> Response {
        let mut res = Response::new();
        exception.write_to(&mut res);
        self.finish(res)
    }

    /// Serialize a pending payload into the body
    fn finish(&self, mut res: Response) -> Response {
        let Some(payload) = res.take_payload() else {
            return res;
        };

        match self.inner.options.serializer.serialize(&payload) {
            Ok(bytes) => {
                res.set_header("content-type", "application/json");
                res.write(bytes);
            }
            Err(_err) => {
                #[cfg(feature = "logging")]
                error!(target: "trellis", error = %_err, "Failed to serialize response payload");

                res.set_status(500);
                res.set_header("content-type", "application/json");
                res.write(json!({ "error": "failed to serialize response" }).to_string());
            }
        }
        res
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("graph", &self.inner.graph)
            .field("routes", &self.inner.router.groups().len())
            .field("options", &self.inner.options)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
