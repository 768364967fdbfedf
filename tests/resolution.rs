use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis::{App, Deps, Error, Lifetime, Module, Provider, REQUEST, Resolved};

struct Database {
    url: String,
}

struct Repository {
    db: Arc<Database>,
}

fn database() -> Module {
    Module::new("database")
        .provider(Provider::value(
            "db",
            Database {
                url: "postgres://localhost".into(),
            },
        ))
        .provider(Provider::value("secret", String::from("hunter2")))
        .export("db")
}

fn repository() -> Module {
    Module::new("repository")
        .import(database)
        .provider(
            Provider::factory("repo", |deps: &Deps| Repository {
                db: deps.get::<Database>(0).expect("db is visible"),
            })
            .inject(["db"]),
        )
        .export("repo")
}

#[test]
fn test_global_provider_is_shared() {
    let dispatcher = App::new(repository).build().unwrap();
    let graph = dispatcher.graph();
    let root = graph.root();

    let a = graph.get::<Repository>("repo", root, None).unwrap();
    let b = graph.get::<Repository>("repo", root, None).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.db.url, "postgres://localhost");
}

#[test]
fn test_transient_provider_is_fresh() {
    static CREATED: AtomicUsize = AtomicUsize::new(0);

    let root = || {
        Module::new("root").provider(
            Provider::factory("id", |_: &Deps| CREATED.fetch_add(1, Ordering::SeqCst))
                .transient(),
        )
    };
    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();

    let a = graph.get::<usize>("id", graph.root(), None).unwrap();
    let b = graph.get::<usize>("id", graph.root(), None).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_ne!(*a, *b);
}

#[test]
fn test_private_provider_is_hidden_from_importer() {
    let dispatcher = App::new(repository).build().unwrap();
    let graph = dispatcher.graph();
    let root = graph.root();
    let db_module = graph.find_module("database").unwrap();

    assert!(graph.is_visible("db", root));
    assert!(!graph.is_visible("secret", root));
    assert!(matches!(graph.resolve("secret", root, None), Resolved::NotFound));

    // the owner still sees it
    let secret = graph.get::<String>("secret", db_module, None).unwrap();
    assert_eq!(secret.as_str(), "hunter2");
}

#[test]
fn test_unexported_parent_provider_stays_local() {
    let root = || {
        Module::new("root")
            .provider(Provider::value("local", 1u8))
            .import(database)
    };
    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    let db_module = graph.find_module("database").unwrap();

    assert!(graph.is_visible("local", graph.root()));
    assert!(!graph.is_visible("local", db_module));
}

#[test]
fn test_child_factory_uses_parent_export() {
    let child = || {
        Module::new("child").provider(
            Provider::factory("greeting", |deps: &Deps| {
                format!("{}Child", deps.get::<String>(0).unwrap())
            })
            .inject(["root"]),
        )
    };
    let root = move || {
        Module::new("root")
            .provider(Provider::value("root", String::from("root")))
            .export("root")
            .import(child)
    };

    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    let child_id = graph.find_module("child").unwrap();

    let greeting = graph.require::<String>("greeting", child_id, None).unwrap();
    assert_eq!(greeting.as_str(), "rootChild");
    assert_eq!(graph.parent(child_id), Some(graph.root()));
}

#[test]
fn test_global_module_visible_everywhere() {
    let config = || {
        Module::new("config")
            .global()
            .provider(Provider::value("config", String::from("prod")))
            .export("config")
    };
    let users = || Module::new("users");
    let root = move || Module::new("root").import(config).import(users);

    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    let users_id = graph.find_module("users").unwrap();

    let value = graph.get::<String>("config", users_id, None).unwrap();
    assert_eq!(value.as_str(), "prod");
}

#[test]
fn test_reexport_shares_instance() {
    static CREATED: AtomicUsize = AtomicUsize::new(0);

    let leaf = || {
        Module::new("leaf")
            .provider(Provider::factory("counter", |_: &Deps| {
                CREATED.fetch_add(1, Ordering::SeqCst)
            }))
            .export("counter")
    };
    let middle = move || Module::new("middle").import(leaf).export("counter");
    let root = move || Module::new("root").import(middle);

    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    let leaf_id = graph.find_module("leaf").unwrap();

    let from_root = graph.get::<usize>("counter", graph.root(), None).unwrap();
    let from_leaf = graph.get::<usize>("counter", leaf_id, None).unwrap();
    assert!(Arc::ptr_eq(&from_root, &from_leaf));
    assert_eq!(CREATED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_dependency_is_absent() {
    let root = || {
        Module::new("root").provider(
            Provider::factory("needs", |deps: &Deps| deps.get::<u32>(0).is_none()).inject(["ghost"]),
        )
    };

    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    assert!(*graph.get::<bool>("needs", graph.root(), None).unwrap());
}

#[test]
fn test_require_wrong_type() {
    let dispatcher = App::new(database).build().unwrap();
    let graph = dispatcher.graph();

    let err = graph.require::<u64>("db", graph.root(), None).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));

    let err = graph.require::<u64>("nope", graph.root(), None).unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn test_duplicate_provider_rejected() {
    let root = || {
        Module::new("root")
            .provider(Provider::value("a", 1u8))
            .provider(Provider::value("a", 2u8))
    };

    let err = App::new(root).build().unwrap_err();
    assert!(matches!(err, Error::DuplicateProvider { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_unknown_export_rejected() {
    let root = || Module::new("root").export("nothing");
    assert!(matches!(
        App::new(root).build().unwrap_err(),
        Error::UnknownExport { .. }
    ));
}

fn ping() -> Module {
    Module::new("ping").import(pong)
}

fn pong() -> Module {
    Module::new("pong").import(ping)
}

#[test]
fn test_import_cycle_rejected() {
    let err = App::new(ping).build().unwrap_err();
    assert!(matches!(err, Error::ImportCycle { .. }));
    assert_eq!(err.to_string(), "Circular module import: ping -> pong -> ping");
}

#[test]
fn test_nested_module_with_parent_name_is_not_a_cycle() {
    let inner = || {
        Module::new("users")
            .provider(Provider::value("store", String::from("inner")))
            .export("store")
    };
    let root = move || Module::new("users").import(inner);

    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    let store = graph.get::<String>("store", graph.root(), None).unwrap();
    assert_eq!(store.as_str(), "inner");
}

#[test]
fn test_dependency_cycle_rejected() {
    let root = || {
        Module::new("root")
            .provider(Provider::factory("a", |_: &Deps| 1u8).inject(["b"]))
            .provider(Provider::factory("b", |_: &Deps| 2u8).inject(["a"]))
    };

    let err = App::new(root).build().unwrap_err();
    assert!(matches!(err, Error::DependencyCycle { .. }));
}

#[test]
fn test_global_depending_on_request_rejected() {
    let root = || {
        Module::new("root")
            .provider(
                Provider::factory("tenant", |_: &Deps| String::from("acme"))
                    .inject([REQUEST])
                    .request(),
            )
            .provider(Provider::factory("greeter", |_: &Deps| 1u8).inject(["tenant"]))
    };

    let err = App::new(root).build().unwrap_err();
    assert!(matches!(err, Error::ScopeMismatch { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_lifetime_introspection() {
    let root = || Module::new("root").request_scoped();
    let dispatcher = App::new(root).build().unwrap();
    let graph = dispatcher.graph();
    assert_eq!(graph.lifetime(graph.root()), Some(Lifetime::Request));
    assert_eq!(graph.module_name(graph.root()), Some("root"));
}
