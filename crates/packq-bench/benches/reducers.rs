//! Reducer benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use packq_bench::fixtures::Scale;
use packq_bench::harness::TestContext;
use packq_core::EngineConfig;
use packq_proto::{Expr, Query};

fn rated_authors() -> Query {
    Query::source("Author").filter(Expr::lambda(
        "a",
        Expr::param("a").member("Rating").ge(Expr::constant(50)),
    ))
}

fn bench_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("reducers/count");

    let ctx = TestContext::with_scale(Scale::Medium);
    let query = rated_authors().count();

    group.bench_function("handles", |b| {
        let provider = ctx.provider(EngineConfig::default());
        b.iter(|| {
            black_box(provider.execute_scalar(query.expr()).unwrap());
        });
    });

    group.bench_function("materialized", |b| {
        let provider = ctx.provider(EngineConfig::materialize_only());
        b.iter(|| {
            black_box(provider.execute_scalar(query.expr()).unwrap());
        });
    });

    group.finish();
}

fn bench_short_circuit(c: &mut Criterion) {
    let mut group = c.benchmark_group("reducers/short_circuit");

    let ctx = TestContext::with_scale(Scale::Large);
    let provider = ctx.provider(EngineConfig::default());

    group.bench_function("any", |b| {
        let query = rated_authors().any();
        b.iter(|| {
            black_box(provider.execute_scalar(query.expr()).unwrap());
        });
    });

    group.bench_function("first", |b| {
        let query = rated_authors().first();
        b.iter(|| {
            black_box(provider.execute_scalar(query.expr()).unwrap());
        });
    });

    group.bench_function("all", |b| {
        let query = Query::source("Author").all(Expr::lambda(
            "a",
            Expr::param("a").member("Country").lt(Expr::constant(100)),
        ));
        b.iter(|| {
            black_box(provider.execute_scalar(query.expr()).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_count, bench_short_circuit);

criterion_main!(benches);
