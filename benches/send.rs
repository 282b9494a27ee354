use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use strata_core::config::EngineConfig;
use strata_core::value::{event_from_json, Event};
use strata_engine::Engine;

fn make_batch(rows: usize) -> Vec<Event> {
    (0..rows)
        .map(|i| {
            let v = match i % 3 {
                0 => json!({"host": format!("h{}", i % 8), "latency": i as i64}),
                1 => json!({"host": format!("h{}", i % 8), "latency": i as i64, "path": "/"}),
                _ => json!({"host": format!("h{}", i % 8), "status": 200}),
            };
            event_from_json(&v).unwrap()
        })
        .collect()
}

fn warmed_engine() -> Engine {
    let engine = Engine::in_memory(EngineConfig {
        output_pool_limit: Some(1024),
        ..EngineConfig::default()
    });
    engine
        .register("slow", None, "select host, latency from metrics where latency > 500")
        .unwrap();
    engine
        .register("paths", None, "select host, nullable(path) as path from metrics")
        .unwrap();
    engine.send("metrics", &make_batch(3)).unwrap();
    engine
}

fn bench_send_known_shapes(c: &mut Criterion) {
    let engine = warmed_engine();
    let batch = make_batch(1024);
    c.bench_function("send_1024_known_shapes", |b| {
        b.iter(|| {
            engine.send("metrics", &batch).unwrap();
        })
    });
}

fn bench_first_contact(c: &mut Criterion) {
    let batch = make_batch(64);
    c.bench_function("send_64_fresh_engine", |b| {
        b.iter(|| {
            let engine = warmed_engine();
            engine.send("metrics", &batch).unwrap();
        })
    });
}

criterion_group!(benches, bench_send_known_shapes, bench_first_contact);
criterion_main!(benches);
