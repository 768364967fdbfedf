//! Request scopes
//!
//! A [`RequestScope`] is the instantiation context of one inbound request:
//! it carries the raw request as the root injectable and caches every
//! Request-lifetime provider resolved while the request is in flight. The
//! cache is cleared exactly once when the request ends, whether the chain
//! returned normally, returned an error, or unwound.

use crate::context::Ctx;
use crate::factory::ProviderEntry;
use crate::graph::ModuleId;
use crate::http::Request;
use crate::middleware::{HttpResult, Middleware, Next};
use crate::provider::{Instance, ProviderName};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope(u64);

impl Scope {
    /// Generate a new unique scope ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

type CacheKey = (ModuleId, ProviderName);

/// Per-request instance cache keyed by `(owning module, provider name)`.
///
/// Never shared between requests. After [`teardown`](Self::teardown) the
/// scope is empty and must not be reused.
pub struct RequestScope {
    scope: Scope,
    request: Instance,
    cache: DashMap<CacheKey, Instance, RandomState>,
    torn_down: AtomicBool,
}

impl RequestScope {
    /// Create a scope seeded with the raw request
    pub fn new(request: Arc<Request>) -> Self {
        let scope = Scope::new();

        #[cfg(feature = "logging")]
        debug!(
            target: "trellis",
            scope_id = scope.id(),
            method = request.method(),
            path = request.path(),
            "Creating request scope"
        );

        Self {
            scope,
            request,
            // request caches hold a handful of entries
            cache: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 4),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Scope identifier
    #[inline]
    pub fn id(&self) -> Scope {
        self.scope
    }

    /// The request this scope was opened for, as the root injectable
    #[inline]
    pub fn request(&self) -> Instance {
        Arc::clone(&self.request)
    }

    /// Whether `name` owned by `module` has been computed in this scope
    pub fn contains(&self, module: ModuleId, name: &str) -> bool {
        self.cache.contains_key(&(module, ProviderName::from(name)))
    }

    /// Number of cached instances
    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[inline]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub(crate) fn cached(&self, entry: &ProviderEntry) -> Option<Instance> {
        self.cache
            .get(&(entry.owner(), entry.name().clone()))
            .map(|v| Arc::clone(v.value()))
    }

    /// Store a computed instance. If another resolution stored first, the
    /// earlier instance wins and is returned.
    pub(crate) fn store(&self, entry: &ProviderEntry, value: Instance) -> Instance {
        let slot = self
            .cache
            .entry((entry.owner(), entry.name().clone()))
            .or_insert(value);
        Arc::clone(slot.value())
    }

    /// Clear every cached instance. Only the first call has an effect;
    /// returns whether this call performed the teardown.
    pub fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "trellis",
            scope_id = self.scope.id(),
            cached = self.cache.len(),
            "Tearing down request scope"
        );

        self.cache.clear();
        true
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("scope", &self.scope)
            .field("cached", &self.cache.len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Tears the scope down when dropped, including during unwinding.
pub(crate) struct ScopeGuard {
    scope: Arc<RequestScope>,
}

impl ScopeGuard {
    pub(crate) fn new(scope: Arc<RequestScope>) -> Self {
        Self { scope }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.teardown();
    }
}

/// Front-of-chain middleware for modules that can see Request providers.
///
/// Opens a scope when the request does not have one yet, warms the
/// module's own Request providers, runs the rest of the chain and tears the
/// scope down. When a scope is already open (an outer module opened it) the
/// layer passes through and the outer layer owns teardown.
pub(crate) struct RequestLifecycle {
    module: ModuleId,
    warm: Vec<ProviderName>,
}

impl RequestLifecycle {
    pub(crate) fn new(module: ModuleId, warm: Vec<ProviderName>) -> Self {
        Self { module, warm }
    }
}

impl Middleware for RequestLifecycle {
    fn handle(&self, ctx: &mut Ctx, next: Next<'_>) -> HttpResult {
        if ctx.scope().is_some() {
            return next.run(ctx);
        }

        let scope = Arc::new(RequestScope::new(ctx.shared_request()));
        let _guard = ScopeGuard::new(Arc::clone(&scope));
        ctx.set_scope(Some(Arc::clone(&scope)));

        let graph = Arc::clone(ctx.graph());
        for name in &self.warm {
            graph.resolve(name, self.module, Some(&scope));
        }

        let result = next.run(ctx);
        ctx.set_scope(None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;

    fn scope() -> RequestScope {
        RequestScope::new(Arc::new(Request::new("GET", "/")))
    }

    #[test]
    fn test_scope_ids_unique() {
        let s1 = Scope::new();
        let s2 = Scope::new();
        let s3 = Scope::new();

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
    }

    #[test]
    fn test_scope_display() {
        let scope = Scope::new();
        assert!(format!("{}", scope).starts_with("scope-"));
    }

    #[test]
    fn test_request_is_root_injectable() {
        let scope = scope();
        let req = scope.request().downcast::<Request>().unwrap();
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn test_store_keeps_first_value() {
        let scope = scope();
        let entry = ProviderEntry::new(Provider::factory("n", |_| 0u8).request(), ModuleId(3));

        let first = scope.store(&entry, Arc::new(1u8));
        let second = scope.store(&entry, Arc::new(2u8));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(scope.contains(ModuleId(3), "n"));
        assert!(!scope.contains(ModuleId(4), "n"));
    }

    #[test]
    fn test_teardown_runs_once() {
        let scope = Arc::new(scope());
        let entry = ProviderEntry::new(Provider::factory("n", |_| 0u8).request(), ModuleId(0));
        scope.store(&entry, Arc::new(1u8));

        {
            let _guard = ScopeGuard::new(Arc::clone(&scope));
        }

        assert!(scope.is_torn_down());
        assert!(scope.is_empty());
        assert!(!scope.teardown());
    }

    #[test]
    fn test_guard_tears_down_on_panic() {
        let scope = Arc::new(scope());
        let inner = Arc::clone(&scope);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = ScopeGuard::new(inner);
            panic!("handler failed");
        }));

        assert!(result.is_err());
        assert!(scope.is_torn_down());
    }
}
