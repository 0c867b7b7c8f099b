//! Benchmarks for the query cache hot paths.
//!
//! Every view reads through the cache on each render, and every drag runs a
//! begin/speculate/settle cycle over several keys, so these are the
//! operations whose cost grows with the number of cached entries.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use dealboard::prelude::*;

fn populated_cache(size: usize) -> QueryCache {
    let cache = QueryCache::new();
    for index in 0..size {
        let id = DealId::new(format!("D{index}"));
        cache.set(
            &DealKeys::detail(&id),
            Deal::new(id.clone(), "Deal", 1_000_000, Stage::ActiveReview),
        );
        cache.set(&PropertyKeys::detail(&format!("p-{index}")), index);
    }
    cache
}

// =============================================================================
// get Benchmark
// =============================================================================

fn benchmark_get(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("get");

    for size in [100, 1_000, 10_000] {
        let cache = populated_cache(size);
        let key = DealKeys::detail(&DealId::new(format!("D{}", size / 2)));
        group.bench_with_input(BenchmarkId::new("detail", size), &size, |bencher, _| {
            bencher.iter(|| black_box(cache.get_data::<Deal>(black_box(&key))));
        });
    }

    group.finish();
}

// =============================================================================
// invalidate Benchmark
// =============================================================================

fn benchmark_invalidate(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("invalidate");

    for size in [100, 1_000, 10_000] {
        let cache = populated_cache(size);
        group.bench_with_input(BenchmarkId::new("resource_prefix", size), &size, |bencher, _| {
            bencher.iter(|| black_box(cache.invalidate(black_box(&DealKeys::all()))));
        });
        group.bench_with_input(BenchmarkId::new("single_key", size), &size, |bencher, _| {
            let key = DealKeys::detail(&DealId::new("D0"));
            bencher.iter(|| black_box(cache.invalidate(black_box(&key))));
        });
    }

    group.finish();
}

// =============================================================================
// Speculation Benchmark
// =============================================================================

fn benchmark_speculate_rollback(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("speculate_rollback");

    for size in [100, 1_000] {
        let client = QueryClient::new(populated_cache(size));
        let engine = OptimisticEngine::new(client);
        let id = DealId::new("D0");
        let key = DealKeys::detail(&id);
        group.bench_with_input(BenchmarkId::new("detail", size), &size, |bencher, _| {
            bencher.iter(|| {
                let mut session = engine.begin(std::slice::from_ref(&key));
                let written = session.apply_speculative::<Deal, _>(&key, |deal| {
                    deal.map(|deal| deal.with_stage(Stage::UnderContract))
                });
                session.rollback();
                black_box(written)
            });
        });
    }

    group.finish();
}

// =============================================================================
// Fetch Deduplication Benchmark
// =============================================================================

fn benchmark_fetch_dedup(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fetch_dedup");
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");

    for waiters in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("waiters", waiters), &waiters, |bencher, &waiters| {
            bencher.to_async(&runtime).iter(|| async move {
                let client = QueryClient::new(QueryCache::new());
                let loader = Loader::new(|| async { Ok::<_, QueryError>(6.25_f64) });
                let options = QueryOptions::default();
                let key = RateKeys::current();
                let results = futures::future::join_all(
                    (0..waiters).map(|_| client.fetch_query(&key, &loader, &options)),
                )
                .await;
                black_box(results)
            });
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Group and Main
// =============================================================================

criterion_group!(
    benches,
    benchmark_get,
    benchmark_invalidate,
    benchmark_speculate_rollback,
    benchmark_fetch_dedup
);

criterion_main!(benches);
