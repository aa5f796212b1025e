//! Slice cache benchmarks
//!
//! Compares the replacement policies on a hot-window access pattern with
//! occasional out-of-order timestamps.
//!
//! Run with: cargo bench --bench cache_bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_core::cache::CachedSliceResolver;
use tessera_core::slice::{SliceStore, SliceStoreConfig, TimeWindowAssigner};
use tessera_core::{OriginId, SliceCacheConfig, SliceCacheType, WindowType};

const SLICE_MS: i64 = 100;
const LOOKUPS: usize = 4096;

/// Mostly recent timestamps with every 16th one reaching back a few slices.
fn timestamps() -> Vec<i64> {
    (0..LOOKUPS as i64)
        .map(|i| {
            let now = i * 5;
            if i % 16 == 0 {
                (now - (i % 7) * SLICE_MS).max(0)
            } else {
                now
            }
        })
        .collect()
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice_resolve");
    group.throughput(Throughput::Elements(LOOKUPS as u64));
    let timestamps = timestamps();

    for cache_type in [
        SliceCacheType::None,
        SliceCacheType::Lru,
        SliceCacheType::Fifo,
        SliceCacheType::SecondChance,
        SliceCacheType::TwoQueues,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(cache_type),
            &cache_type,
            |b, &cache_type| {
                let assigner =
                    TimeWindowAssigner::from_window_type(&WindowType::tumbling(SLICE_MS)).unwrap();
                let store = Arc::new(SliceStore::<(), _>::new(
                    assigner,
                    [OriginId(1)],
                    SliceStoreConfig::default(),
                ));
                let mut resolver = CachedSliceResolver::new(
                    store,
                    &SliceCacheConfig::new(cache_type, 10),
                )
                .unwrap();

                b.iter(|| {
                    for &ts in &timestamps {
                        black_box(resolver.resolve(black_box(ts)).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
