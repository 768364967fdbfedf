//! Consumers
//!
//! A consumer splices extra middleware into routes a module has already
//! registered, selected by path and method. Without include rules every
//! route is selected; exclude rules are applied after includes.

use crate::middleware::Middleware;
use crate::route::{RouteDef, join_path};
use std::fmt;
use std::sync::Arc;

/// Method token matching every method
pub const METHOD_ALL: &str = "ALL";

/// Path token matching every path
pub const PATH_ALL: &str = "*";

/// One include or exclude rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePath {
    pub method: String,
    pub path: String,
}

impl RoutePath {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok = self.method == METHOD_ALL || self.method.eq_ignore_ascii_case(method);
        let path_ok = self.path == PATH_ALL || join_path([self.path.as_str()]) == path;
        method_ok && path_ok
    }
}

#[derive(Clone, Default)]
pub struct Consumer {
    middlewares: Vec<Arc<dyn Middleware>>,
    includes: Vec<RoutePath>,
    excludes: Vec<RoutePath>,
}

impl Consumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Middleware to splice into every selected route
    pub fn apply<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn include(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.includes.push(RoutePath::new(method, path));
        self
    }

    pub fn exclude(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.excludes.push(RoutePath::new(method, path));
        self
    }

    /// Whether a route (path without the global prefix) is selected
    pub fn selects(&self, method: &str, path: &str) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|r| r.matches(method, path));
        included && !self.excludes.iter().any(|r| r.matches(method, path))
    }

    /// Prepend this consumer's middleware to the selected routes
    pub(crate) fn splice<'a>(&self, routes: impl IntoIterator<Item = &'a mut RouteDef>) -> usize {
        let mut touched = 0;
        for route in routes
            .into_iter()
            .filter(|r| self.selects(&r.method, &r.path))
        {
            let mut spliced = self.middlewares.clone();
            spliced.append(&mut route.consumer_middlewares);
            route.consumer_middlewares = spliced;
            touched += 1;
        }
        touched
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("middlewares", &self.middlewares.len())
            .field("includes", &self.includes)
            .field("excludes", &self.excludes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_includes_selects_everything() {
        let consumer = Consumer::new();
        assert!(consumer.selects("GET", "/users"));
        assert!(consumer.selects("DELETE", "/posts/{id}"));
    }

    #[test]
    fn test_include_rules() {
        let consumer = Consumer::new()
            .include(METHOD_ALL, "users")
            .include("POST", PATH_ALL);

        assert!(consumer.selects("GET", "/users"));
        assert!(consumer.selects("DELETE", "/users"));
        assert!(consumer.selects("POST", "/posts"));
        assert!(!consumer.selects("GET", "/posts"));
    }

    #[test]
    fn test_excludes_after_includes() {
        let consumer = Consumer::new()
            .include(METHOD_ALL, PATH_ALL)
            .exclude("GET", "/health");

        assert!(consumer.selects("POST", "/health"));
        assert!(!consumer.selects("GET", "/health"));

        let none = Consumer::new().exclude(METHOD_ALL, PATH_ALL);
        assert!(!none.selects("GET", "/anything"));
    }
}
