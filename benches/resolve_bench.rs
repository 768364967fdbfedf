//! Benchmarks for graph construction, resolution and dispatch

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use trellis::{App, Controller, Deps, Dispatcher, Module, Provider, REQUEST, Request, RequestScope};

#[allow(dead_code)]
struct Config {
    url: String,
}

#[allow(dead_code)]
struct Service {
    config: Option<Arc<Config>>,
    values: Vec<i32>,
}

#[allow(dead_code)]
struct Tenant(String);

fn config() -> Module {
    Module::new("config")
        .provider(Provider::value(
            "config",
            Config {
                url: "postgres://localhost".into(),
            },
        ))
        .export("config")
}

fn services() -> Module {
    Module::new("services")
        .import(config)
        .provider(
            Provider::factory("service", |deps: &Deps| Service {
                config: deps.get::<Config>(0),
                values: vec![1, 2, 3],
            })
            .inject(["config"]),
        )
        .provider(
            Provider::factory("transient", |deps: &Deps| Service {
                config: deps.get::<Config>(0),
                values: Vec::new(),
            })
            .inject(["config"])
            .transient(),
        )
        .provider(
            Provider::factory("tenant", |deps: &Deps| {
                Tenant(
                    deps.get::<Request>(0)
                        .and_then(|req| req.header("x-tenant").map(str::to_string))
                        .unwrap_or_default(),
                )
            })
            .inject([REQUEST])
            .request(),
        )
        .export("service")
}

fn app() -> Module {
    Module::new("app").import(services).controller(
        Controller::new("bench")
            .get("static", |ctx| ctx.send("ok"))
            .get("{id}", |ctx| {
                let id = ctx.param("id").unwrap_or_default().to_string();
                ctx.json(json!({ "id": id }))
            }),
    )
}

fn dispatcher() -> Dispatcher {
    App::new(app).build().unwrap()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");

    group.bench_function("three_modules", |b| {
        b.iter(|| black_box(App::new(app).build().unwrap()))
    });

    group.bench_function("deep_imports_8", |b| {
        fn level(depth: usize) -> Module {
            let mut module = Module::new(format!("level-{depth}"))
                .provider(Provider::value(format!("p{depth}"), depth))
                .export(format!("p{depth}"));
            if depth < 8 {
                module = module.import(move || level(depth + 1));
            }
            module
        }

        b.iter(|| black_box(App::new(|| level(0)).build().unwrap()))
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let dispatcher = dispatcher();
    let graph = dispatcher.graph();
    let root = graph.root();
    let services = graph.find_module("services").unwrap();

    group.bench_function("global_from_importer", |b| {
        b.iter(|| black_box(graph.get::<Service>("service", root, None).unwrap()))
    });

    group.bench_function("global_from_owner", |b| {
        b.iter(|| black_box(graph.get::<Service>("service", services, None).unwrap()))
    });

    group.bench_function("transient", |b| {
        b.iter(|| black_box(graph.get::<Service>("transient", services, None).unwrap()))
    });

    group.bench_function("not_visible", |b| {
        b.iter(|| black_box(graph.resolve("transient", root, None)))
    });

    group.finish();
}

fn bench_request_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_scope");

    let dispatcher = dispatcher();
    let graph = dispatcher.graph();
    let services = graph.find_module("services").unwrap();
    let request = Arc::new(Request::new("GET", "/bench").with_header("x-tenant", "acme"));

    group.bench_function("create_scope", |b| {
        b.iter(|| black_box(RequestScope::new(Arc::clone(&request))))
    });

    group.bench_function("resolve_cached", |b| {
        let scope = RequestScope::new(Arc::clone(&request));
        b.iter(|| black_box(graph.get::<Tenant>("tenant", services, Some(&scope)).unwrap()))
    });

    group.bench_function("resolve_fresh_scope", |b| {
        b.iter(|| {
            let scope = RequestScope::new(Arc::clone(&request));
            let tenant = graph.get::<Tenant>("tenant", services, Some(&scope)).unwrap();
            scope.teardown();
            black_box(tenant)
        })
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let dispatcher = dispatcher();

    group.bench_function("static_route", |b| {
        b.iter(|| black_box(dispatcher.handle(Request::new("GET", "/bench/static"))))
    });

    group.bench_function("param_route_json", |b| {
        b.iter(|| black_box(dispatcher.handle(Request::new("GET", "/bench/42"))))
    });

    group.bench_function("not_found", |b| {
        b.iter(|| black_box(dispatcher.handle(Request::new("GET", "/missing/route/here"))))
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("dispatch_4_threads", |b| {
        let dispatcher = dispatcher();

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let d = dispatcher.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = d.handle(Request::new("GET", "/bench/static"));
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_build,
    bench_resolution,
    bench_request_scope,
    bench_dispatch,
    bench_concurrent,
);

criterion_main!(benches);
