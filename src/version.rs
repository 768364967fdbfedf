//! API versioning
//!
//! Routes sharing a method and path are grouped by version. When a group has
//! more than one candidate, a version token is extracted from the request
//! with the configured strategy and the matching route is dispatched.

use crate::error::{Error, Result};
use crate::http::Request;
use crate::route::Endpoint;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Message of the 500 produced when no route matches the version token
pub const VERSION_NOT_FOUND: &str = "version not found";

type Extractor = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Where the version token comes from
#[derive(Clone)]
pub enum VersionStrategy {
    /// A named request header
    Header(String),
    /// A `v<token>` path segment, stripped before route lookup
    Uri,
    /// The value following `key` inside the `Accept` header, up to the next
    /// `;` or the end
    MediaType(String),
    /// A user-supplied extractor
    Custom(Extractor),
}

impl fmt::Debug for VersionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(name) => f.debug_tuple("Header").field(name).finish(),
            Self::Uri => f.write_str("Uri"),
            Self::MediaType(key) => f.debug_tuple("MediaType").field(key).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Versioning configuration, checked once at boot
///
/// ```rust
/// use trellis::VersionOptions;
///
/// assert!(VersionOptions::header("x-version").validate().is_ok());
/// assert!(VersionOptions::media_type("").validate().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct VersionOptions {
    strategy: VersionStrategy,
}

impl VersionOptions {
    pub fn header(name: impl Into<String>) -> Self {
        Self {
            strategy: VersionStrategy::Header(name.into()),
        }
    }

    pub fn uri() -> Self {
        Self {
            strategy: VersionStrategy::Uri,
        }
    }

    pub fn media_type(key: impl Into<String>) -> Self {
        Self {
            strategy: VersionStrategy::MediaType(key.into()),
        }
    }

    pub fn custom<F>(extractor: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        Self {
            strategy: VersionStrategy::Custom(Arc::new(extractor)),
        }
    }

    pub fn strategy(&self) -> &VersionStrategy {
        &self.strategy
    }

    pub fn validate(&self) -> Result<()> {
        match &self.strategy {
            VersionStrategy::Header(name) if name.trim().is_empty() => Err(
                Error::InvalidVersioning("header strategy needs a header name".into()),
            ),
            VersionStrategy::MediaType(key) if key.trim().is_empty() => Err(
                Error::InvalidVersioning("media type strategy needs a key".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Extract the version token and the path to look up.
    ///
    /// Only the URI strategy rewrites the path: the first `v<token>`
    /// segment whose token is a declared version is removed.
    pub(crate) fn extract(&self, request: &Request, known: &HashSet<String>) -> (String, String) {
        let path = request.path();
        let token = match &self.strategy {
            VersionStrategy::Header(name) => request.header(name).unwrap_or_default().to_string(),
            VersionStrategy::MediaType(key) => media_type_token(request.header("accept"), key),
            VersionStrategy::Custom(extractor) => extractor(request),
            VersionStrategy::Uri => return strip_uri_version(path, known),
        };
        (token, path.to_string())
    }
}

fn media_type_token(accept: Option<&str>, key: &str) -> String {
    let Some(accept) = accept else {
        return String::new();
    };
    let Some(idx) = accept.find(key) else {
        return String::new();
    };
    let rest = &accept[idx + key.len()..];
    match rest.find(';') {
        Some(end) => rest[..end].to_string(),
        None => rest.to_string(),
    }
}

fn strip_uri_version(path: &str, known: &HashSet<String>) -> (String, String) {
    let mut token = String::new();
    let mut kept: Vec<&str> = Vec::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if token.is_empty() {
            if let Some(candidate) = segment.strip_prefix('v') {
                if known.contains(candidate) {
                    token = candidate.to_string();
                    continue;
                }
            }
        }
        kept.push(segment);
    }

    (token, crate::route::join_path(kept))
}

/// Outcome of picking a route from a version group
pub(crate) enum Selection<'a> {
    Dispatch(&'a Endpoint),
    VersionNotFound,
}

/// Pick the endpoint for `token`.
///
/// One candidate is dispatched whatever the token. An empty token prefers
/// the unversioned route, then the first registered one.
pub(crate) fn select<'a>(endpoints: &'a [Endpoint], token: &str) -> Selection<'a> {
    match endpoints {
        [] => Selection::VersionNotFound,
        [only] => Selection::Dispatch(only),
        [first, ..] if token.is_empty() => Selection::Dispatch(
            endpoints
                .iter()
                .find(|e| e.version.is_none())
                .unwrap_or(first),
        ),
        _ => endpoints
            .iter()
            .find(|e| e.version.as_deref() == Some(token))
            .map_or(Selection::VersionNotFound, Selection::Dispatch),
    }
}
