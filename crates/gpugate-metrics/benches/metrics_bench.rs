// Criterion benchmarks for gpugate-metrics
//
// Run benchmarks with:
//   cargo bench -p gpugate-metrics

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gpugate_metrics::MetricsRegistry;
use std::time::Duration;

fn bench_record_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_dispatch");
    let registry = MetricsRegistry::new();

    group.bench_function("known_backend", |b| {
        b.iter(|| {
            registry.record_dispatch(
                black_box("10.0.0.1:8000"),
                black_box(Duration::from_millis(850)),
                black_box(true),
            );
        });
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for fleet in [4usize, 32, 128] {
        let registry = MetricsRegistry::new();
        for i in 0..fleet {
            let address = format!("10.0.{}.{}:8000", i / 256, i % 256);
            for ms in 0..50 {
                registry.record_dispatch(&address, Duration::from_millis(ms * 20), ms % 7 != 0);
            }
        }

        group.bench_with_input(BenchmarkId::from_parameter(fleet), &registry, |b, registry| {
            b.iter(|| black_box(registry.snapshot()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_dispatch, bench_snapshot);
criterion_main!(benches);
