//! # Trellis - Modules, Providers and Request Dispatch
//!
//! A hierarchical dependency-injection runtime with a composable request
//! pipeline on top.
//!
//! ## Features
//!
//! - **Modules** - providers, imports, exports and controllers wired into an
//!   arena graph at startup; cycles and bad exports fail the build
//! - **Three lifetimes** - Global (computed once), Request (once per request
//!   scope), Transient (every resolution)
//! - **Visibility** - a module sees its own providers, what its parent handed
//!   down, what its imports export and what global modules export
//! - **Request pipeline** - middleware, guards, pipes, an interceptor and the
//!   handler, always composed in the same order
//! - **Versioning** - by header, URI segment, media-type parameter or a
//!   custom extractor
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis::{App, Controller, Module, Provider, Request};
//! use serde_json::json;
//!
//! struct Greeter {
//!     prefix: String,
//! }
//!
//! fn greeting() -> Module {
//!     Module::new("greeting")
//!         .provider(Provider::value("prefix", String::from("Hello")))
//!         .provider(
//!             Provider::factory("greeter", |deps: &trellis::Deps| Greeter {
//!                 prefix: deps.get::<String>(0).map(|p| (*p).clone()).unwrap_or_default(),
//!             })
//!             .inject(["prefix"]),
//!         )
//!         .export("greeter")
//! }
//!
//! fn app() -> Module {
//!     Module::new("app").import(greeting).controller(
//!         Controller::new("hello").get("{name}", |ctx| {
//!             let greeter = ctx.require::<Greeter>("greeter")?;
//!             let name = ctx.param("name").unwrap_or("stranger").to_string();
//!             ctx.json(json!({ "message": format!("{}, {}!", greeter.prefix, name) }))
//!         }),
//!     )
//! }
//!
//! let dispatcher = App::new(app).build().unwrap();
//! let res = dispatcher.handle(Request::new("GET", "/hello/ferris"));
//! assert_eq!(res.status(), 200);
//! assert_eq!(res.text(), r#"{"message":"Hello, ferris!"}"#);
//! ```
//!
//! ## Request Providers
//!
//! ```rust
//! use trellis::{App, Controller, Module, Provider, Request, REQUEST};
//!
//! fn tenant() -> Module {
//!     Module::new("tenant")
//!         .request_scoped()
//!         .provider(
//!             Provider::factory("tenant", |deps: &trellis::Deps| {
//!                 deps.get::<Request>(0)
//!                     .and_then(|req| req.header("x-tenant").map(str::to_string))
//!                     .unwrap_or_else(|| "public".to_string())
//!             })
//!             .inject([REQUEST])
//!             .request(),
//!         )
//!         .controller(Controller::new("whoami").get("", |ctx| {
//!             let tenant = ctx.require::<String>("tenant")?;
//!             ctx.send(tenant.as_str())
//!         }))
//! }
//!
//! let dispatcher = App::new(tenant).build().unwrap();
//! let req = Request::new("GET", "/whoami").with_header("x-tenant", "acme");
//! assert_eq!(dispatcher.handle(req).text(), "acme");
//! ```

mod app;
mod builder;
mod consumer;
mod context;
mod controller;
mod error;
mod exception;
mod factory;
mod graph;
mod http;
mod module;
mod provider;
mod route;
mod scope;
mod storage;
mod version;

pub mod guard;
pub mod interceptor;
#[cfg(feature = "logging")]
pub mod logging;
pub mod middleware;
pub mod pipe;

pub use app::{
    App, AppOptions, Dispatcher, ErrorHandler, Failure, HEALTH_MESSAGE, NotFoundHandler,
    TIMEOUT_MESSAGE, default_error_handler, default_not_found_handler,
};
pub use consumer::{Consumer, METHOD_ALL, PATH_ALL, RoutePath};
pub use context::{Ctx, Metadata};
pub use controller::{Composition, Controller};
pub use error::{Error, Result};
pub use exception::HttpException;
pub use factory::ProviderEntry;
pub use graph::{ModuleGraph, ModuleId, Resolved};
pub use guard::{FORBIDDEN_MESSAGE, Guard, GuardOwner, GuardRef};
pub use http::{Request, Response, SerializeError, Serializer};
pub use interceptor::{Interceptor, StripNulls};
pub use middleware::{Chain, Handler, HttpResult, Middleware, Next};
pub use module::{Module, ModuleCtor, ModuleHook, ModuleRef};
pub use pipe::{DtoPipe, FieldError, Pipe, PipeSource, Validate, ValidationErrors};
pub use provider::{Deps, Injectable, Instance, Lifetime, Provider, ProviderName, REQUEST, Visibility};
pub use route::{RouteInfo, join_path};
pub use scope::{RequestScope, Scope};
pub use version::{VERSION_NOT_FOUND, VersionOptions, VersionStrategy};

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        App, Composition, Consumer, Controller, Ctx, Deps, Dispatcher, Error, Guard, GuardRef,
        HttpException, HttpResult, Interceptor, Lifetime, Middleware, Module, ModuleRef, Next,
        Pipe, Provider, REQUEST, Request, Response, Result, Validate, VersionOptions,
    };
    pub use std::sync::Arc;
}
