use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::routing::get;
use axum::Router;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use greenlight::{
    ClientRegistry, ControlConfig, ControlPlane, DynamicConfig, RateLimitGate, RateLimitSettings,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

// Generous limits so the benchmark measures the allow path, not denials.
fn gate() -> RateLimitGate {
    let settings = DynamicConfig::new(RateLimitSettings {
        enabled: true,
        refill_per_second: 1_000_000.0,
        burst: 1_000_000,
    });
    RateLimitGate::new(Arc::new(ClientRegistry::new(settings, Duration::from_secs(180))))
}

fn admission_single_client(c: &mut Criterion) {
    let gate = gate();
    c.bench_function("admission_single_client", |b| {
        b.iter(|| black_box(gate.check(black_box(Some("192.0.2.1")))));
    });
}

fn admission_many_clients(c: &mut Criterion) {
    let gate = gate();
    let clients: Vec<String> = (0..1024).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
    let mut next = 0usize;
    c.bench_function("admission_1024_clients", |b| {
        b.iter(|| {
            next = (next + 1) % clients.len();
            black_box(gate.check(Some(clients[next].as_str())))
        });
    });
}

fn admission_disabled(c: &mut Criterion) {
    let gate = gate();
    gate.set_enabled(false).unwrap();
    c.bench_function("admission_disabled", |b| {
        b.iter(|| black_box(gate.check(black_box(Some("192.0.2.1")))));
    });
}

fn full_stack_request(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config =
        ControlConfig::builder().refill_per_second(1_000_000.0).burst(1_000_000).build().unwrap();
    let plane = ControlPlane::new(config).unwrap();
    let router = plane.wrap(Router::new().route("/", get(|| async { "ok" })));
    let peer: SocketAddr = "192.0.2.1:40000".parse().unwrap();

    c.bench_function("full_stack_request", |b| {
        b.to_async(&rt).iter(|| async {
            let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
            req.extensions_mut().insert(ConnectInfo(peer));
            let _ = black_box(router.clone().oneshot(req).await);
        });
    });
}

criterion_group!(
    benches,
    admission_single_client,
    admission_many_clients,
    admission_disabled,
    full_stack_request
);
criterion_main!(benches);
