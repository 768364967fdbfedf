//! Per-module provider storage
//!
//! Each module node owns one `ProviderStorage`. It is written only while the
//! graph is being built and is read-only afterwards, so a plain `HashMap`
//! with `ahash` is enough: no concurrent map is needed on the lookup path.

use crate::error::{Error, Result};
use crate::factory::ProviderEntry;
use crate::provider::{ProviderName, Visibility};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

struct Slot {
    entry: Arc<ProviderEntry>,
    visibility: Visibility,
}

/// Providers owned by one module, in registration order
pub(crate) struct ProviderStorage {
    slots: Vec<Slot>,
    index: HashMap<ProviderName, usize, RandomState>,
}

impl ProviderStorage {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Register an entry as private. Names are unique per module.
    pub(crate) fn register(&mut self, module: &str, entry: ProviderEntry) -> Result<Arc<ProviderEntry>> {
        let entry = Arc::new(entry);
        self.register_shared(module, Arc::clone(&entry))?;
        Ok(entry)
    }

    /// Register an entry declared elsewhere, for re-exporting it. The entry
    /// keeps its original owner, so its caches are shared.
    pub(crate) fn register_shared(&mut self, module: &str, entry: Arc<ProviderEntry>) -> Result<()> {
        if self.index.contains_key(entry.name()) {
            return Err(Error::DuplicateProvider {
                module: module.to_string(),
                name: entry.name().clone(),
            });
        }

        self.index.insert(entry.name().clone(), self.slots.len());
        self.slots.push(Slot {
            entry,
            visibility: Visibility::Private,
        });
        Ok(())
    }

    /// Look up an owned entry regardless of visibility
    #[inline]
    pub(crate) fn get(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
        self.index.get(name).map(|&idx| &self.slots[idx].entry)
    }

    /// Look up an owned entry only if it is exported
    #[inline]
    pub(crate) fn get_public(&self, name: &str) -> Option<&Arc<ProviderEntry>> {
        let slot = &self.slots[*self.index.get(name)?];
        (slot.visibility == Visibility::Public).then_some(&slot.entry)
    }

    /// Mark an owned entry as exported. Returns false if the name is not owned.
    pub(crate) fn mark_public(&mut self, name: &str) -> bool {
        match self.index.get(name) {
            Some(&idx) => {
                self.slots[idx].visibility = Visibility::Public;
                true
            }
            None => false,
        }
    }

    /// All owned entries in registration order
    pub(crate) fn entries(&self) -> impl Iterator<Item = &Arc<ProviderEntry>> {
        self.slots.iter().map(|slot| &slot.entry)
    }

    /// Exported entries in registration order
    pub(crate) fn public_entries(&self) -> impl Iterator<Item = &Arc<ProviderEntry>> {
        self.slots
            .iter()
            .filter(|slot| slot.visibility == Visibility::Public)
            .map(|slot| &slot.entry)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Debug for ProviderStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStorage")
            .field("count", &self.len())
            .field("public", &self.public_entries().count())
            .finish()
    }
}
