//! Benchmarks for the local annotation store
//!
//! Run with: cargo bench

use annotations::storage::{Annotation, AnnotationStore, LocalStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;

const BASE_TS: i64 = 1_700_000_000;

fn seeded_store(runtime: &tokio::runtime::Runtime, count: i64) -> (LocalStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = LocalStore::open(dir.path().join("bench.db")).unwrap();

    runtime.block_on(async {
        for i in 0..count {
            store
                .add(&Annotation::with_timestamp("bench", BASE_TS + i).tags(["web", "deploy"]))
                .await
                .unwrap();
        }
    });

    (store, dir)
}

fn bench_add(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("add");

    for tag_count in [1usize, 4] {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("bench.db")).unwrap();
        let tags: Vec<String> = (0..tag_count).map(|i| format!("tag{}", i)).collect();
        let annotation = Annotation::with_timestamp("bench", BASE_TS).tags(tags);

        group.throughput(Throughput::Elements(tag_count as u64));
        group.bench_function(format!("tags_{}", tag_count), |b| {
            b.iter(|| runtime.block_on(store.add(black_box(&annotation))).unwrap())
        });
    }

    group.finish();
}

fn bench_range(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("range_for_tag");

    let (store, _dir) = seeded_store(&runtime, 10_000);

    for range in [60i64, 3600] {
        group.throughput(Throughput::Elements(range as u64 + 1));
        group.bench_function(format!("range_{}", range), |b| {
            b.iter(|| {
                runtime
                    .block_on(store.range_for_tag(black_box("web"), range, BASE_TS + 5000))
                    .unwrap()
            })
        });
    }

    group.bench_function("tag_stats", |b| {
        b.iter(|| runtime.block_on(store.tag_stats()).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_add, bench_range);
criterion_main!(benches);
