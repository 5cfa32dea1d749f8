//! Benchmarks for the sequence engine.
//!
//! Measures:
//! - Pipeline decode and drain of a single step
//! - Full unperturbed runs against the bare reference reduction
//! - Perturbed runs at the default gate probability

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vcpu_engine::{reference_steps, Pipeline, SequenceEngine, WorkerId, XorShiftGate};

// =============================================================================
// Single Step
// =============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1));

    group.bench_function("even", |b| {
        b.iter(|| Pipeline::for_value(black_box(1_000_000)).drain(black_box(1_000_000), 0));
    });

    group.bench_function("odd", |b| {
        b.iter(|| Pipeline::for_value(black_box(999_999)).drain(black_box(999_999), 0));
    });

    group.finish();
}

// =============================================================================
// Full Runs
// =============================================================================

fn bench_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    let engine = SequenceEngine::new(WorkerId(1));

    for start in [27u64, 97, 871, 77_031] {
        let steps = reference_steps(start).unwrap_or(0);
        group.throughput(Throughput::Elements(steps));

        group.bench_with_input(BenchmarkId::new("reference", start), &start, |b, &n| {
            b.iter(|| reference_steps(black_box(n)));
        });

        group.bench_with_input(BenchmarkId::new("engine", start), &start, |b, &n| {
            b.iter(|| engine.run(black_box(n as i64)));
        });
    }

    group.finish();
}

fn bench_perturbed(c: &mut Criterion) {
    let mut group = c.benchmark_group("perturbed");
    let engine = SequenceEngine::new(WorkerId(1))
        .with_perturbation(Arc::new(XorShiftGate::default()), 0.15)
        .with_seed(7);

    for start in [27u64, 871] {
        group.bench_with_input(BenchmarkId::from_parameter(start), &start, |b, &n| {
            b.iter(|| engine.run(black_box(n as i64)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_runs, bench_perturbed);
criterion_main!(benches);
