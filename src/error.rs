//! Error types for module graph construction and provider resolution

use crate::ProviderName;
use thiserror::Error;

/// Errors raised while building the module graph, composing routes, or
/// forcing a typed provider lookup.
///
/// Everything except [`Error::NotFound`] and [`Error::TypeMismatch`] is a
/// boot-time configuration error and should abort startup.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Two providers with the same name were registered in one module
    #[error("Provider already registered in module {module}: {name}")]
    DuplicateProvider { module: String, name: ProviderName },

    /// A module exported a name it neither owns nor inherits
    #[error("Module {module} exports unknown provider: {name}")]
    UnknownExport { module: String, name: ProviderName },

    /// A module (transitively) imports itself
    #[error("Circular module import: {path}")]
    ImportCycle { path: String },

    /// Provider factories (transitively) inject each other
    #[error("Circular provider dependency: {path}")]
    DependencyCycle { path: String },

    /// A Global provider depends, directly or through Transient providers,
    /// on a per-request value
    #[error("Global provider '{provider}' cannot depend on request-scoped '{dependency}'")]
    ScopeMismatch {
        provider: ProviderName,
        dependency: ProviderName,
    },

    /// The same method, path and version were registered twice
    #[error("Route already registered: {method} {path} (version {version})")]
    DuplicateRoute {
        method: String,
        path: String,
        version: String,
    },

    /// Versioning options are incomplete or malformed
    #[error("Invalid versioning configuration: {0}")]
    InvalidVersioning(String),

    /// A required provider was not visible from the calling module
    #[error("Provider not found: {name}")]
    NotFound { name: ProviderName },

    /// A provider resolved to a value of another type
    #[error("Provider {name} is not a {expected}")]
    TypeMismatch {
        name: ProviderName,
        expected: &'static str,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a NotFound error for a provider name
    #[inline]
    pub fn not_found(name: impl Into<ProviderName>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a TypeMismatch error for the expected type `T`
    #[inline]
    pub fn type_mismatch<T: 'static>(name: impl Into<ProviderName>) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Whether this error aborts startup
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::NotFound { .. } | Self::TypeMismatch { .. })
    }
}

/// Result type alias for graph and resolution operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::DuplicateProvider {
            module: "users".into(),
            name: ProviderName::from("repo"),
        };
        assert_eq!(
            err.to_string(),
            "Provider already registered in module users: repo"
        );

        let err = Error::type_mismatch::<String>("repo");
        assert!(err.to_string().contains("alloc::string::String"));
    }

    #[test]
    fn test_configuration_classification() {
        assert!(Error::ImportCycle { path: "a -> a".into() }.is_configuration());
        assert!(Error::InvalidVersioning("empty header".into()).is_configuration());
        assert!(!Error::not_found("x").is_configuration());
    }
}
