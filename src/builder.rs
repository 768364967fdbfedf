//! Module graph construction
//!
//! Builds the arena of module nodes from the root constructor, depth first.
//! For each module: register providers, build imports (each child takes a
//! snapshot of what its parent can hand down), register controllers, mark
//! exports public, then apply consumers to the routes gathered so far.

use crate::error::{Error, Result};
use crate::factory::ProviderEntry;
use crate::graph::{ModuleGraph, ModuleId, ModuleNode};
use crate::guard::{Guard, GuardOwner, GuardRef};
use crate::middleware::Middleware;
use crate::module::{Import, Module, ModuleHook};
use crate::provider::ProviderName;
use crate::route::RouteDef;
use ahash::RandomState;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

type Inherited = HashMap<ProviderName, Arc<ProviderEntry>, RandomState>;

/// What a child module copies from its parent at creation
struct Snapshot {
    providers: Inherited,
    middlewares: Vec<Arc<dyn Middleware>>,
    guards: Vec<(GuardRef, Arc<dyn Guard>)>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            providers: HashMap::with_hasher(RandomState::new()),
            middlewares: Vec::new(),
            guards: Vec::new(),
        }
    }
}

/// Route-side state of one module, indexed like the graph's nodes
pub(crate) struct ModuleLayers {
    /// Parent snapshot followed by the module's own middleware
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) guards: Vec<(GuardRef, Arc<dyn Guard>)>,
    /// Indexes into `Blueprint::routes`: own routes and imported ones
    pub(crate) routes: Vec<usize>,
    pub(crate) hooks: Vec<ModuleHook>,
}

/// Output of a build: the provider graph plus everything needed to compose
/// routes
pub(crate) struct Blueprint {
    pub(crate) graph: ModuleGraph,
    pub(crate) layers: Vec<ModuleLayers>,
    pub(crate) routes: Vec<RouteDef>,
}

pub(crate) fn build(root: &Import) -> Result<Blueprint> {
    let mut builder = GraphBuilder {
        nodes: Vec::new(),
        layers: Vec::new(),
        routes: Vec::new(),
        globals: Vec::new(),
        stack: Vec::new(),
        routed: HashSet::with_hasher(RandomState::new()),
    };

    let root = builder.build_module((root.ctor)(), root.kind, None, Snapshot::empty())?;
    let graph = ModuleGraph {
        nodes: builder.nodes,
        root,
        globals: builder.globals,
    };
    graph.check_dependency_cycles()?;

    #[cfg(feature = "logging")]
    debug!(
        target: "trellis",
        modules = graph.len(),
        routes = builder.routes.len(),
        "Module graph built"
    );

    Ok(Blueprint {
        graph,
        layers: builder.layers,
        routes: builder.routes,
    })
}

struct GraphBuilder {
    nodes: Vec<ModuleNode>,
    layers: Vec<ModuleLayers>,
    routes: Vec<RouteDef>,
    globals: Vec<ModuleId>,
    /// Definitions currently being built, outermost first
    stack: Vec<DefinitionKey>,
    /// Definitions whose controllers are already registered
    routed: HashSet<DefinitionKey, RandomState>,
}

/// Constructor type plus module name
type DefinitionKey = (TypeId, String);

impl GraphBuilder {
    fn build_module(
        &mut self,
        def: Module,
        kind: TypeId,
        parent: Option<ModuleId>,
        snapshot: Snapshot,
    ) -> Result<ModuleId> {
        if let Some(pos) = self
            .stack
            .iter()
            .position(|(k, name)| *k == kind && *name == def.name)
        {
            let mut path: Vec<&str> = self.stack[pos..].iter().map(|(_, name)| name.as_str()).collect();
            path.push(&def.name);
            return Err(Error::ImportCycle {
                path: path.join(" -> "),
            });
        }

        let id = ModuleId(self.nodes.len());
        let mut node = ModuleNode::new(id, def.name.clone(), def.lifetime, parent);
        node.global = def.global;
        node.inherited = snapshot.providers;
        self.nodes.push(node);

        let mut middlewares = snapshot.middlewares;
        middlewares.extend(def.middlewares.iter().cloned());
        let mut guards = snapshot.guards;
        let module_ref = GuardRef::new(GuardOwner::Module, &def.name, id);
        guards.extend(def.guards.iter().map(|g| (module_ref.clone(), Arc::clone(g))));
        self.layers.push(ModuleLayers {
            middlewares,
            guards,
            routes: Vec::new(),
            hooks: def.on_init.clone(),
        });

        #[cfg(feature = "logging")]
        debug!(
            target: "trellis",
            module = %def.name,
            id = id.index(),
            lifetime = def.lifetime.as_str(),
            "Building module"
        );

        // providers first so imports and controllers can see them
        for provider in &def.providers {
            #[cfg(feature = "logging")]
            debug!(
                target: "trellis",
                module = %def.name,
                provider = %provider.name(),
                lifetime = provider.lifetime().as_str(),
                "Registering provider"
            );

            let entry = ProviderEntry::new(provider.clone(), id);
            self.nodes[id.0].storage.register(&def.name, entry)?;
        }

        self.stack.push((kind, def.name.clone()));
        for import in &def.imports {
            let child = (import.ctor)();
            let snapshot = self.snapshot_for_child(id, &def);
            let child_id = self.build_module(child, import.kind, Some(id), snapshot)?;

            self.nodes[id.0].imports.push(child_id);
            let imported = self.layers[child_id.0].routes.clone();
            self.layers[id.0].routes.extend(imported);
        }
        self.stack.pop();

        // a definition imported along several paths serves its routes once,
        // from the first node built
        let first = self.routed.insert((kind, def.name.clone()));
        if !first && !def.controllers.is_empty() {
            #[cfg(feature = "logging")]
            debug!(
                target: "trellis",
                module = %def.name,
                id = id.index(),
                "Routes already registered by an earlier import"
            );
        }

        let controllers = if first { def.controllers.as_slice() } else { &[] };
        for controller in controllers {
            for route in controller.routes_for(id) {
                #[cfg(feature = "logging")]
                debug!(
                    target: "trellis",
                    module = %def.name,
                    route = %format!("{} {}", route.method, route.path),
                    version = route.version.as_deref().unwrap_or(""),
                    "Registering route"
                );

                self.layers[id.0].routes.push(self.routes.len());
                self.routes.push(route);
            }
        }

        for name in &def.exports {
            self.export(id, &def.name, name)?;
        }

        for consumer in &def.consumers {
            let selected = &self.layers[id.0].routes;
            let routes = self
                .routes
                .iter_mut()
                .enumerate()
                .filter(|(idx, _)| selected.contains(idx))
                .map(|(_, route)| route);
            let _touched = consumer.splice(routes);

            #[cfg(feature = "logging")]
            debug!(
                target: "trellis",
                module = %def.name,
                routes = _touched,
                "Applied consumer"
            );
        }

        if def.global {
            self.globals.push(id);
        }

        Ok(id)
    }

    /// Mark `name` public on `id`. A name the module does not own but can
    /// see (inherited or imported) is re-exported under its original owner.
    fn export(&mut self, id: ModuleId, module: &str, name: &ProviderName) -> Result<()> {
        if self.nodes[id.0].storage.mark_public(name) {
            return Ok(());
        }

        let seen = self.nodes[id.0]
            .inherited
            .get(name)
            .cloned()
            .or_else(|| {
                self.nodes[id.0]
                    .imports
                    .iter()
                    .find_map(|&import| self.find_exported(import, name))
            });

        match seen {
            Some(entry) => {
                let node = &mut self.nodes[id.0];
                node.storage.register_shared(module, entry)?;
                node.storage.mark_public(name);
                Ok(())
            }
            None => Err(Error::UnknownExport {
                module: module.to_string(),
                name: name.clone(),
            }),
        }
    }

    fn find_exported(&self, id: ModuleId, name: &str) -> Option<Arc<ProviderEntry>> {
        let node = &self.nodes[id.0];
        node.storage.get_public(name).cloned().or_else(|| {
            node.imports
                .iter()
                .find_map(|&import| self.find_exported(import, name))
        })
    }

    /// The parent's inherited set, what its already-built imports export,
    /// and the parent's own providers it declares as exports
    fn snapshot_for_child(&self, parent: ModuleId, def: &Module) -> Snapshot {
        let node = &self.nodes[parent.0];
        let mut providers = node.inherited.clone();

        let mut stack: Vec<ModuleId> = node.imports.iter().rev().copied().collect();
        while let Some(import) = stack.pop() {
            let imported = &self.nodes[import.0];
            for entry in imported.storage.public_entries() {
                providers
                    .entry(entry.name().clone())
                    .or_insert_with(|| Arc::clone(entry));
            }
            stack.extend(imported.imports.iter().rev());
        }

        for name in &def.exports {
            if let Some(entry) = node.storage.get(name) {
                providers.insert(name.clone(), Arc::clone(entry));
            }
        }

        let layers = &self.layers[parent.0];
        Snapshot {
            providers,
            middlewares: layers.middlewares.clone(),
            guards: layers.guards.clone(),
        }
    }
}
