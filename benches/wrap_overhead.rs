/// Profiling wrapper overhead benchmarks
///
/// Compares a bare closure against the same closure wrapped with reporting
/// to a no-op sink, and measures profile rendering on its own.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sniffer::function_profiler::{FunctionKey, FunctionStats, ProfileStats};
use sniffer::{Benchmark, ProfileConfig, SortKey, TrackingAllocator};
use std::alloc::System;
use std::time::Duration;
use tracing::Level;

#[global_allocator]
static ALLOCATOR: TrackingAllocator<System> = TrackingAllocator::system();

fn checksum(n: u64) -> u64 {
    (0..n).fold(0u64, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
}

/// Baseline: the closure called directly
fn bench_unwrapped(c: &mut Criterion) {
    let mut group = c.benchmark_group("unwrapped");
    for n in [10u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(checksum(black_box(n))));
        });
    }
    group.finish();
}

/// The same closure through the wrapper, report discarded
fn bench_wrapped(c: &mut Criterion) {
    let bench = Benchmark::with_sink(
        ProfileConfig::default().without_log_file(),
        |_: Level, message: &str| {
            black_box(message);
        },
    );
    let wrapped = bench.wrap("checksum", checksum);

    let mut group = c.benchmark_group("wrapped");
    group.measurement_time(Duration::from_secs(5));
    for n in [10u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(wrapped.call((black_box(n),))));
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let stats: ProfileStats = (0..200u32)
        .map(|i| {
            (
                FunctionKey::new("src/lib.rs", i, format!("fn_{}", i)),
                FunctionStats {
                    calls: u64::from(i % 17 + 1),
                    primitive_calls: u64::from(i % 17 + 1),
                    total_time: Duration::from_micros(u64::from(i) * 13),
                    cumulative_time: Duration::from_micros(u64::from(i) * 29),
                },
            )
        })
        .collect();

    let mut group = c.benchmark_group("render");
    for limit in [10usize, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, &limit| {
            b.iter(|| {
                let mut sorted = stats.clone();
                black_box(sorted.sort_stats(SortKey::Cumulative).render(limit))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_unwrapped, bench_wrapped, bench_render);
criterion_main!(benches);
