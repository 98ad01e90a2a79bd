//! Dense string index benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use packq_bench::fixtures::Scale;
use packq_bench::harness::TestContext;
use packq_core::query::{find_start_offsets, DenseStringCache, MatchKind};
use packq_core::EngineConfig;
use packq_proto::{Expr, Query};

fn bench_offset_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_string/scan");

    let ctx = TestContext::with_scale(Scale::Medium);
    let table = ctx.tables.get("Book").unwrap();
    let bytes = table.dense_string_table_bytes();

    for (name, kind) in [
        ("contains", MatchKind::Contains),
        ("starts_with", MatchKind::StartsWith),
        ("ends_with", MatchKind::EndsWith),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &kind, |b, kind| {
            b.iter(|| black_box(find_start_offsets(bytes, black_box(b"Book 12"), *kind)));
        });
    }

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_string/cache");

    let ctx = TestContext::with_scale(Scale::Medium);
    let table = ctx.tables.get("Book").unwrap();
    let bytes = table.dense_string_table_bytes();

    group.bench_function("hit", |b| {
        let cache = DenseStringCache::new(16);
        cache.get_or_compute(bytes, b"Book 12", MatchKind::Contains);
        b.iter(|| black_box(cache.get_or_compute(bytes, b"Book 12", MatchKind::Contains)));
    });

    group.bench_function("miss", |b| {
        let cache = DenseStringCache::new(1);
        let needles: [&[u8]; 2] = [b"Book 12", b"Book 34"];
        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(cache.get_or_compute(bytes, needles[i % 2], MatchKind::Contains))
        });
    });

    group.finish();
}

fn bench_string_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_string/filter");

    let ctx = TestContext::with_scale(Scale::Medium);
    let query = Query::source("Book").filter(Expr::lambda(
        "b",
        Expr::param("b").member("Title").contains(Expr::constant("Book 12")),
    ));

    for (name, config) in [
        ("indexed", EngineConfig::default()),
        ("per_row", EngineConfig::default().dense_string_index(false)),
    ] {
        let provider = ctx.provider(config);
        group.bench_function(name, |b| {
            b.iter(|| {
                let rows = provider.query(black_box(&query)).unwrap();
                black_box(rows.into_values().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_offset_scan, bench_cache, bench_string_filter);

criterion_main!(benches);
