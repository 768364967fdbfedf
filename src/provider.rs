//! Provider declarations
//!
//! A provider is a named injectable: either a fixed value or a factory that
//! receives its declared dependencies positionally.

use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Type-erased provider instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Name of the root provider holding the inbound request inside a
/// request scope.
pub const REQUEST: &str = "REQUEST";

/// Marker trait for types that can be stored as provider values.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {
    /// Returns the type name for debugging
    #[inline]
    fn type_name_of() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Provider name, cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderName(Arc<str>);

impl ProviderName {
    /// Create a new provider name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderName {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&ProviderName> for ProviderName {
    fn from(value: &ProviderName) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ProviderName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for ProviderName {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ProviderName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// How long a resolved instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// Computed once, shared for the whole process
    #[default]
    Global,

    /// Computed once per inbound request, cleared when the request ends
    Request,

    /// Computed on every resolution
    Transient,
}

impl Lifetime {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Lifetime::Global => "global",
            Lifetime::Request => "request",
            Lifetime::Transient => "transient",
        }
    }
}

/// Whether a provider is visible to importing modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    /// Only resolvable from the owning module
    #[default]
    Private,
    /// Exported to every module that imports the owner
    Public,
}

/// Resolved dependencies handed to a factory, in declaration order.
///
/// A dependency that could not be resolved is `None`; factories decide
/// whether that is fatal.
pub struct Deps {
    values: Vec<Option<Instance>>,
}

impl Deps {
    pub(crate) fn new(values: Vec<Option<Instance>>) -> Self {
        Self { values }
    }

    /// Number of declared dependencies
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the factory declared no dependencies
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The type-erased dependency at `index`
    #[inline]
    pub fn raw(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// The dependency at `index`, if present and of type `T`
    pub fn get<T: Injectable>(&self, index: usize) -> Option<Arc<T>> {
        self.raw(index)
            .and_then(|any| Arc::clone(any).downcast::<T>().ok())
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deps")
            .field("len", &self.values.len())
            .field("missing", &self.values.iter().filter(|v| v.is_none()).count())
            .finish()
    }
}

pub(crate) type FactoryFn = Arc<dyn Fn(&Deps) -> Instance + Send + Sync>;

#[derive(Clone)]
pub(crate) enum ProviderSource {
    Value(Instance),
    Factory(FactoryFn),
}

/// Declaration of a provider, registered into a module.
///
/// # Examples
///
/// ```rust
/// use trellis::{Lifetime, Provider};
///
/// let root = Provider::value("root", String::from("root"));
/// let child = Provider::factory("child", |deps| {
///     format!("{}Child", deps.get::<String>(0).unwrap())
/// })
/// .inject(["root"]);
///
/// assert_eq!(child.lifetime(), Lifetime::Global);
/// assert_eq!(root.name().as_str(), "root");
/// ```
#[derive(Clone)]
pub struct Provider {
    pub(crate) name: ProviderName,
    pub(crate) lifetime: Lifetime,
    pub(crate) source: ProviderSource,
    pub(crate) inject: Vec<ProviderName>,
}

impl Provider {
    /// A provider with a fixed value
    pub fn value<T: Injectable>(name: impl Into<ProviderName>, value: T) -> Self {
        Self {
            name: name.into(),
            lifetime: Lifetime::Global,
            source: ProviderSource::Value(Arc::new(value)),
            inject: Vec::new(),
        }
    }

    /// A provider computed by `factory` from its injected dependencies
    pub fn factory<T, F>(name: impl Into<ProviderName>, factory: F) -> Self
    where
        T: Injectable,
        F: Fn(&Deps) -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            lifetime: Lifetime::Global,
            source: ProviderSource::Factory(Arc::new(move |deps: &Deps| {
                Arc::new(factory(deps)) as Instance
            })),
            inject: Vec::new(),
        }
    }

    /// Declare the dependencies passed to the factory, in order
    pub fn inject<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<ProviderName>,
    {
        self.inject.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the lifetime
    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Shorthand for `with_lifetime(Lifetime::Request)`
    pub fn request(self) -> Self {
        self.with_lifetime(Lifetime::Request)
    }

    /// Shorthand for `with_lifetime(Lifetime::Transient)`
    pub fn transient(self) -> Self {
        self.with_lifetime(Lifetime::Transient)
    }

    /// Provider name
    pub fn name(&self) -> &ProviderName {
        &self.name
    }

    /// Provider lifetime
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Declared dependency names
    pub fn dependencies(&self) -> &[ProviderName] {
        &self.inject
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("lifetime", &self.lifetime)
            .field("inject", &self.inject)
            .field(
                "source",
                &match self.source {
                    ProviderSource::Value(_) => "value",
                    ProviderSource::Factory(_) => "factory",
                },
            )
            .finish()
    }
}
