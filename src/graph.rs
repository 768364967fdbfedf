//! The built module graph and provider resolution
//!
//! Modules live in an arena addressed by [`ModuleId`]. Once built, the graph
//! is immutable: resolution only reads node tables, and the only shared
//! mutable state is each Global entry's compute-once cell and the per-request
//! caches in [`RequestScope`].

use crate::error::{Error, Result};
use crate::factory::ProviderEntry;
use crate::provider::{Deps, Injectable, Instance, Lifetime, ProviderName, REQUEST};
use crate::scope::RequestScope;
use crate::storage::ProviderStorage;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{trace, warn};

/// Handle of a module node inside a [`ModuleGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module-{}", self.0)
    }
}

/// Outcome of a provider lookup.
///
/// A miss is not an error: optional dependencies resolve to `NotFound` and
/// the caller decides what that means.
#[derive(Clone)]
pub enum Resolved {
    Found(Instance),
    NotFound,
}

impl Resolved {
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Self::Found(instance) => Some(instance),
            Self::NotFound => None,
        }
    }

    pub fn into_instance(self) -> Option<Instance> {
        match self {
            Self::Found(instance) => Some(instance),
            Self::NotFound => None,
        }
    }

    /// The value as `T`. A value of another type is treated as absent.
    pub fn downcast<T: Injectable>(self) -> Option<Arc<T>> {
        self.into_instance()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(_) => f.write_str("Found(..)"),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// One module in the arena
pub(crate) struct ModuleNode {
    pub(crate) id: ModuleId,
    pub(crate) name: String,
    pub(crate) lifetime: Lifetime,
    pub(crate) global: bool,
    pub(crate) parent: Option<ModuleId>,
    pub(crate) storage: ProviderStorage,
    /// Snapshot of what the parent could hand down when this node was created
    pub(crate) inherited: HashMap<ProviderName, Arc<ProviderEntry>, RandomState>,
    pub(crate) imports: Vec<ModuleId>,
}

impl ModuleNode {
    pub(crate) fn new(id: ModuleId, name: String, lifetime: Lifetime, parent: Option<ModuleId>) -> Self {
        Self {
            id,
            name,
            lifetime,
            global: false,
            parent,
            storage: ProviderStorage::new(),
            inherited: HashMap::with_hasher(RandomState::new()),
            imports: Vec::new(),
        }
    }
}

/// The wired module tree
pub struct ModuleGraph {
    pub(crate) nodes: Vec<ModuleNode>,
    pub(crate) root: ModuleId,
    pub(crate) globals: Vec<ModuleId>,
}

impl ModuleGraph {
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            root: ModuleId(0),
            globals: Vec::new(),
        }
    }

    /// The root module
    #[inline]
    pub fn root(&self) -> ModuleId {
        self.root
    }

    /// Number of module nodes
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, id: ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(id.0)
    }

    /// All module ids in creation order
    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.nodes.iter().map(|node| node.id)
    }

    pub fn module_name(&self, id: ModuleId) -> Option<&str> {
        self.node(id).map(|node| node.name.as_str())
    }

    /// First module created with `name`
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.nodes.iter().find(|node| node.name == name).map(|node| node.id)
    }

    pub fn lifetime(&self, id: ModuleId) -> Option<Lifetime> {
        self.node(id).map(|node| node.lifetime)
    }

    pub fn parent(&self, id: ModuleId) -> Option<ModuleId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn imports(&self, id: ModuleId) -> &[ModuleId] {
        self.node(id).map(|node| node.imports.as_slice()).unwrap_or(&[])
    }

    /// Whether `name` is resolvable from `caller`
    pub fn is_visible(&self, name: &str, caller: ModuleId) -> bool {
        self.lookup(name, caller).is_some()
    }

    /// Find the entry `caller` sees for `name`: owned, then inherited, then
    /// the first import (in declaration order, transitively) that exports
    /// it, then global modules.
    pub(crate) fn lookup(&self, name: &str, caller: ModuleId) -> Option<&Arc<ProviderEntry>> {
        let node = self.node(caller)?;

        if let Some(entry) = node.storage.get(name) {
            return Some(entry);
        }
        if let Some(entry) = node.inherited.get(name) {
            return Some(entry);
        }
        if let Some(entry) = node
            .imports
            .iter()
            .find_map(|&import| self.find_exported(name, import))
        {
            return Some(entry);
        }

        self.globals
            .iter()
            .filter(|&&global| global != caller)
            .find_map(|&global| self.find_exported(name, global))
    }

    fn find_exported(&self, name: &str, id: ModuleId) -> Option<&Arc<ProviderEntry>> {
        let node = self.node(id)?;
        node.storage.get_public(name).or_else(|| {
            node.imports
                .iter()
                .find_map(|&import| self.find_exported(name, import))
        })
    }

    /// Every entry visible from `caller`, nearest definition per name
    pub(crate) fn visible_entries(&self, caller: ModuleId) -> Vec<Arc<ProviderEntry>> {
        let mut seen: HashMap<ProviderName, Arc<ProviderEntry>, RandomState> =
            HashMap::with_hasher(RandomState::new());
        let Some(node) = self.node(caller) else {
            return Vec::new();
        };

        for entry in node.storage.entries().chain(node.inherited.values()) {
            seen.entry(entry.name().clone())
                .or_insert_with(|| Arc::clone(entry));
        }

        let mut stack: Vec<ModuleId> = node.imports.iter().rev().copied().collect();
        stack.extend(self.globals.iter().rev().filter(|&&g| g != caller));
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                for entry in node.storage.public_entries() {
                    seen.entry(entry.name().clone())
                        .or_insert_with(|| Arc::clone(entry));
                }
                stack.extend(node.imports.iter().rev());
            }
        }

        seen.into_values().collect()
    }

    /// Resolve `name` as seen from `caller`.
    ///
    /// Request providers need an open scope; without one they resolve to
    /// `NotFound`. Inside a scope the raw request is available as
    /// [`REQUEST`].
    pub fn resolve(&self, name: &str, caller: ModuleId, scope: Option<&RequestScope>) -> Resolved {
        if name == REQUEST {
            if let Some(scope) = scope {
                return Resolved::Found(scope.request());
            }
        }

        let Some(entry) = self.lookup(name, caller) else {
            #[cfg(feature = "logging")]
            trace!(
                target: "trellis",
                provider = name,
                module = %caller,
                "Provider not visible from module"
            );
            return Resolved::NotFound;
        };

        #[cfg(feature = "logging")]
        trace!(
            target: "trellis",
            provider = name,
            module = %caller,
            owner = %entry.owner(),
            lifetime = entry.lifetime().as_str(),
            "Resolving provider"
        );

        match self.instantiate(entry, scope) {
            Some(instance) => Resolved::Found(instance),
            None => Resolved::NotFound,
        }
    }

    /// Resolve and downcast in one step
    pub fn get<T: Injectable>(
        &self,
        name: &str,
        caller: ModuleId,
        scope: Option<&RequestScope>,
    ) -> Option<Arc<T>> {
        self.resolve(name, caller, scope).downcast::<T>()
    }

    /// Resolve and downcast, reporting why the value is unavailable
    pub fn require<T: Injectable>(
        &self,
        name: &str,
        caller: ModuleId,
        scope: Option<&RequestScope>,
    ) -> Result<Arc<T>> {
        self.resolve(name, caller, scope)
            .into_instance()
            .ok_or_else(|| Error::not_found(name))?
            .downcast::<T>()
            .map_err(|_| Error::type_mismatch::<T>(name))
    }

    fn instantiate(&self, entry: &ProviderEntry, scope: Option<&RequestScope>) -> Option<Instance> {
        match entry.lifetime() {
            Lifetime::Global => entry.global_instance(|| self.resolve_deps(entry, scope)),
            Lifetime::Request => {
                let Some(scope) = scope else {
                    #[cfg(feature = "logging")]
                    warn!(
                        target: "trellis",
                        provider = %entry.name(),
                        "Request provider resolved outside of a request scope"
                    );
                    return None;
                };

                if let Some(cached) = scope.cached(entry) {
                    return Some(cached);
                }

                let deps = self.resolve_deps(entry, Some(scope));
                let value = entry.create(&deps)?;
                Some(scope.store(entry, value))
            }
            Lifetime::Transient => entry.create(&self.resolve_deps(entry, scope)),
        }
    }

    // dependencies resolve from the declaring module, whoever asked
    fn resolve_deps(&self, entry: &ProviderEntry, scope: Option<&RequestScope>) -> Deps {
        Deps::new(
            entry
                .dependencies()
                .iter()
                .map(|dep| self.resolve(dep, entry.owner(), scope).into_instance())
                .collect(),
        )
    }

    /// Reject provider dependency cycles, which would otherwise recurse
    /// without bound at resolution time
    pub(crate) fn check_dependency_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            /// Whether the entry needs a request to be computed
            Done(bool),
        }

        fn visit(
            graph: &ModuleGraph,
            entry: &Arc<ProviderEntry>,
            marks: &mut HashMap<usize, Mark, RandomState>,
            path: &mut Vec<ProviderName>,
        ) -> Result<bool> {
            let key = Arc::as_ptr(entry) as usize;
            match marks.get(&key) {
                Some(Mark::Done(bound)) => return Ok(*bound),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == entry.name()).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].iter().map(ProviderName::as_str).collect();
                    cycle.push(entry.name().as_str());
                    return Err(Error::DependencyCycle {
                        path: cycle.join(" -> "),
                    });
                }
                None => {}
            }

            marks.insert(key, Mark::Visiting);
            path.push(entry.name().clone());
            let mut bound = entry.lifetime() == Lifetime::Request;
            for dep in entry.dependencies() {
                let dep_bound = if dep.as_str() == REQUEST {
                    true
                } else if let Some(next) = graph.lookup(dep, entry.owner()) {
                    visit(graph, next, marks, path)?
                } else {
                    false
                };

                if dep_bound && entry.lifetime() == Lifetime::Global {
                    return Err(Error::ScopeMismatch {
                        provider: entry.name().clone(),
                        dependency: dep.clone(),
                    });
                }
                bound |= dep_bound;
            }
            path.pop();
            marks.insert(key, Mark::Done(bound));
            Ok(bound)
        }

        let mut marks = HashMap::with_hasher(RandomState::new());
        let mut path = Vec::new();
        for node in &self.nodes {
            for entry in node.storage.entries() {
                visit(self, entry, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("modules", &self.nodes.len())
            .field("root", &self.root)
            .field("globals", &self.globals)
            .finish()
    }
}
