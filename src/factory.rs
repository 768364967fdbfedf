//! Registered provider entries and their lifetime-specific instantiation
//!
//! Entries use an enum over the three lifetimes instead of trait objects, in
//! the same spirit as a type-erased factory table: the match on the lifetime
//! is visible to the optimizer and each variant owns exactly the state it
//! needs (a compute-once cell for Global, nothing for the others).

use crate::graph::ModuleId;
use crate::provider::{Deps, FactoryFn, Instance, Lifetime, Provider, ProviderName, ProviderSource};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// How an entry produces its instance
pub(crate) enum EntryKind {
    /// Fixed value supplied at registration
    Value(Instance),
    /// Lazy process-wide instance; the cell guarantees the factory runs once
    /// even when concurrent requests race on first resolution
    Global {
        factory: FactoryFn,
        instance: OnceCell<Instance>,
    },
    /// One instance per request scope
    Request(FactoryFn),
    /// New instance on every resolution
    Transient(FactoryFn),
}

/// A provider registered into a module node.
///
/// Entries are shared (`Arc`) between the owning node and every node that
/// snapshots it through inheritance, so a Global entry is computed once no
/// matter where it is resolved from.
pub struct ProviderEntry {
    pub(crate) name: ProviderName,
    pub(crate) owner: ModuleId,
    pub(crate) inject: Vec<ProviderName>,
    pub(crate) kind: EntryKind,
}

impl ProviderEntry {
    pub(crate) fn new(provider: Provider, owner: ModuleId) -> Self {
        let kind = match (provider.source, provider.lifetime) {
            (ProviderSource::Value(value), _) => EntryKind::Value(value),
            (ProviderSource::Factory(factory), Lifetime::Global) => EntryKind::Global {
                factory,
                instance: OnceCell::new(),
            },
            (ProviderSource::Factory(factory), Lifetime::Request) => EntryKind::Request(factory),
            (ProviderSource::Factory(factory), Lifetime::Transient) => {
                EntryKind::Transient(factory)
            }
        };

        Self {
            name: provider.name,
            owner,
            inject: provider.inject,
            kind,
        }
    }

    /// Provider name
    #[inline]
    pub fn name(&self) -> &ProviderName {
        &self.name
    }

    /// Module that registered this entry
    #[inline]
    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    /// Declared dependency names, in injection order
    #[inline]
    pub fn dependencies(&self) -> &[ProviderName] {
        &self.inject
    }

    /// Effective lifetime. Fixed values behave as Global.
    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        match self.kind {
            EntryKind::Value(_) | EntryKind::Global { .. } => Lifetime::Global,
            EntryKind::Request(_) => Lifetime::Request,
            EntryKind::Transient(_) => Lifetime::Transient,
        }
    }

    /// Whether a Global instance has been computed already
    pub fn is_initialized(&self) -> bool {
        match &self.kind {
            EntryKind::Value(_) => true,
            EntryKind::Global { instance, .. } => instance.get().is_some(),
            EntryKind::Request(_) | EntryKind::Transient(_) => false,
        }
    }

    /// Produce a Global instance, running the factory at most once.
    ///
    /// `deps` is only invoked when the cell is still empty.
    pub(crate) fn global_instance(&self, deps: impl FnOnce() -> Deps) -> Option<Instance> {
        match &self.kind {
            EntryKind::Value(value) => Some(Arc::clone(value)),
            EntryKind::Global { factory, instance } => {
                let value = instance.get_or_init(|| {
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "trellis",
                        provider = %self.name,
                        "Global provider initializing on first access"
                    );

                    factory(&deps())
                });
                Some(Arc::clone(value))
            }
            EntryKind::Request(_) | EntryKind::Transient(_) => None,
        }
    }

    /// Invoke the factory of a Request or Transient entry
    pub(crate) fn create(&self, deps: &Deps) -> Option<Instance> {
        match &self.kind {
            EntryKind::Request(factory) | EntryKind::Transient(factory) => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "trellis",
                    provider = %self.name,
                    lifetime = self.lifetime().as_str(),
                    "Creating new provider instance"
                );

                Some(factory(deps))
            }
            EntryKind::Value(_) | EntryKind::Global { .. } => None,
        }
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("lifetime", &self.lifetime())
            .field("inject", &self.inject)
            .finish()
    }
}
