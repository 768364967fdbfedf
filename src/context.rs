//! Per-request execution context
//!
//! [`Ctx`] travels through every layer of a route chain. It exposes the
//! request, the response being built, a typed key/value bag for values set
//! by one layer and read by another (a tenant id set by a guard, say), the
//! matched route's metadata, and injection from the module that owns the
//! route.

use crate::exception::HttpException;
use crate::graph::{ModuleGraph, ModuleId, Resolved};
use crate::http::{Request, Response};
use crate::middleware::HttpResult;
use crate::provider::Injectable;
use crate::scope::RequestScope;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered route metadata
pub type Metadata = Map<String, Value>;

pub struct Ctx {
    request: Arc<Request>,
    response: Response,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    pipes: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    metadata: Arc<Metadata>,
    graph: Arc<ModuleGraph>,
    module: ModuleId,
    scope: Option<Arc<RequestScope>>,
}

impl Ctx {
    pub(crate) fn new(
        request: Arc<Request>,
        graph: Arc<ModuleGraph>,
        module: ModuleId,
        metadata: Arc<Metadata>,
    ) -> Self {
        Self {
            request,
            response: Response::new(),
            values: HashMap::new(),
            pipes: HashMap::new(),
            metadata,
            graph,
            module,
            scope: None,
        }
    }

    // ---- request ----

    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn shared_request(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    #[inline]
    pub fn method(&self) -> &str {
        self.request.method()
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query(name)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.param(name)
    }

    pub fn body(&self) -> &[u8] {
        self.request.body()
    }

    // ---- response ----

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub(crate) fn into_response(self) -> Response {
        self.response
    }

    /// Set the response status
    pub fn status(&mut self, status: u16) -> &mut Self {
        self.response.set_status(status);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.response.set_header(name, value);
        self
    }

    /// Set a structured payload, serialized once the chain completes
    pub fn json<T: Serialize>(&mut self, value: T) -> HttpResult {
        let value =
            serde_json::to_value(value).map_err(|e| HttpException::internal(e.to_string()))?;
        self.response.set_payload(value);
        Ok(())
    }

    /// Write a plain-text body
    pub fn send(&mut self, text: impl Into<String>) -> HttpResult {
        self.response.set_header("content-type", "text/plain; charset=utf-8");
        self.response.write(text.into());
        Ok(())
    }

    // ---- value bag ----

    /// Store a value visible to every later layer of this request
    pub fn set<T: Injectable>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// A value set earlier in the chain, if present and of type `T`
    pub fn get<T: Injectable>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn remove<T: Injectable>(&mut self, key: &str) -> Option<T> {
        let boxed = self.values.remove(key)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(boxed) => {
                self.values.insert(key.to_string(), boxed);
                None
            }
        }
    }

    pub(crate) fn set_pipe_value<T: Injectable>(&mut self, value: T) {
        self.pipes.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// The typed value produced by a pipe for this route
    pub fn pipe_value<T: Injectable>(&self) -> Option<&T> {
        self.pipes.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    // ---- route metadata ----

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn all_metadata(&self) -> &Metadata {
        &self.metadata
    }

    // ---- injection ----

    /// Module owning the matched route
    #[inline]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    /// The request scope, when the owning module has one open
    pub fn scope(&self) -> Option<&Arc<RequestScope>> {
        self.scope.as_ref()
    }

    pub(crate) fn set_scope(&mut self, scope: Option<Arc<RequestScope>>) {
        self.scope = scope;
    }

    /// Resolve a provider visible from the owning module
    pub fn inject(&self, name: &str) -> Resolved {
        self.graph.resolve(name, self.module, self.scope.as_deref())
    }

    /// Resolve and downcast; absent when missing or of another type
    pub fn inject_as<T: Injectable>(&self, name: &str) -> Option<Arc<T>> {
        self.inject(name).downcast::<T>()
    }

    /// Resolve and downcast, failing the request with a 500 when absent
    pub fn require<T: Injectable>(&self, name: &str) -> HttpResult<Arc<T>> {
        self.graph
            .require::<T>(name, self.module, self.scope.as_deref())
            .map_err(HttpException::from)
    }
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("method", &self.method())
            .field("path", &self.path())
            .field("module", &self.module)
            .field("status", &self.response.status())
            .field("scope", &self.scope.as_ref().map(|s| s.id()))
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_ctx(request: Request) -> Ctx {
    Ctx::new(
        Arc::new(request),
        Arc::new(ModuleGraph::empty()),
        ModuleId(0),
        Arc::new(Metadata::new()),
    )
}
