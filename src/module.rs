//! Declarative module definitions
//!
//! A [`Module`] describes providers, imports, controllers and exports. It is
//! only a description: [`App::build`](crate::App::build) turns the tree of
//! module constructors into a [`ModuleGraph`].
//!
//! Imports are constructors rather than values, so two modules may refer to
//! each other in code; such a cycle is reported at build time.
//!
//! # Examples
//!
//! ```rust
//! use trellis::{Module, Provider};
//!
//! fn database() -> Module {
//!     Module::new("database")
//!         .provider(Provider::value("url", String::from("postgres://localhost")))
//!         .export("url")
//! }
//!
//! fn app() -> Module {
//!     Module::new("app").import(database)
//! }
//! # let _ = app();
//! ```

use crate::consumer::Consumer;
use crate::controller::Controller;
use crate::graph::{ModuleGraph, ModuleId, Resolved};
use crate::guard::Guard;
use crate::middleware::Middleware;
use crate::provider::{Injectable, Lifetime, Provider, ProviderName};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Builds a module definition
pub type ModuleCtor = Arc<dyn Fn() -> Module + Send + Sync>;

/// A constructor tagged with its concrete type. Together with the module
/// name this identifies a module definition across repeated imports.
#[derive(Clone)]
pub(crate) struct Import {
    pub(crate) kind: TypeId,
    pub(crate) ctor: ModuleCtor,
}

impl Import {
    pub(crate) fn new<F>(ctor: F) -> Self
    where
        F: Fn() -> Module + Send + Sync + 'static,
    {
        Self {
            kind: TypeId::of::<F>(),
            ctor: Arc::new(ctor),
        }
    }
}

/// Runs once against a built module
pub type ModuleHook = Arc<dyn Fn(&ModuleRef<'_>) + Send + Sync>;

#[derive(Clone)]
pub struct Module {
    pub(crate) name: String,
    pub(crate) lifetime: Lifetime,
    pub(crate) global: bool,
    pub(crate) providers: Vec<Provider>,
    pub(crate) imports: Vec<Import>,
    pub(crate) controllers: Vec<Controller>,
    pub(crate) exports: Vec<ProviderName>,
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
    pub(crate) consumers: Vec<Consumer>,
    pub(crate) on_init: Vec<ModuleHook>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifetime: Lifetime::Global,
            global: false,
            providers: Vec::new(),
            imports: Vec::new(),
            controllers: Vec::new(),
            exports: Vec::new(),
            middlewares: Vec::new(),
            guards: Vec::new(),
            consumers: Vec::new(),
            on_init: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module lifetime. A Request module opens a request scope on each of
    /// its routes and computes its Request providers up front.
    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Shorthand for `lifetime(Lifetime::Request)`
    pub fn request_scoped(self) -> Self {
        self.lifetime(Lifetime::Request)
    }

    /// Make this module's exports visible from every module in the graph
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn import<F>(mut self, ctor: F) -> Self
    where
        F: Fn() -> Module + Send + Sync + 'static,
    {
        self.imports.push(Import::new(ctor));
        self
    }

    pub fn controller(mut self, controller: Controller) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Export a provider the module owns or can see
    pub fn export(mut self, name: impl Into<ProviderName>) -> Self {
        self.exports.push(name.into());
        self
    }

    pub fn exports<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<ProviderName>,
    {
        self.exports.extend(names.into_iter().map(Into::into));
        self
    }

    /// Middleware for every route in this module and the modules it imports
    pub fn use_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Guard for every route in this module and the modules it imports
    pub fn guard<G: Guard>(mut self, guard: G) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    /// Splice middleware into selected routes of this module
    pub fn consumer(mut self, consumer: Consumer) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Run `hook` once after the whole graph is built
    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ModuleRef<'_>) + Send + Sync + 'static,
    {
        self.on_init.push(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .field("global", &self.global)
            .field("providers", &self.providers)
            .field("imports", &self.imports.len())
            .field("controllers", &self.controllers)
            .field("exports", &self.exports)
            .finish()
    }
}

/// A built module, as seen by lifecycle hooks
pub struct ModuleRef<'a> {
    graph: &'a ModuleGraph,
    id: ModuleId,
}

impl<'a> ModuleRef<'a> {
    pub(crate) fn new(graph: &'a ModuleGraph, id: ModuleId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        self.graph.module_name(self.id).unwrap_or_default()
    }

    pub fn graph(&self) -> &'a ModuleGraph {
        self.graph
    }

    /// Resolve a provider visible from this module. Request providers are
    /// never available here.
    pub fn inject(&self, name: &str) -> Resolved {
        self.graph.resolve(name, self.id, None)
    }

    pub fn get<T: Injectable>(&self, name: &str) -> Option<Arc<T>> {
        self.inject(name).downcast::<T>()
    }
}

impl fmt::Debug for ModuleRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}
