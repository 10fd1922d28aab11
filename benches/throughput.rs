//! Throughput Benchmark for FlashStore
//!
//! Measures the recency cache, the file store and the frame codec in
//! isolation from the network.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flashstore::protocol::{decode_request, encode_request, encode_response, RequestFrame, ResponseFrame};
use flashstore::storage::{FileStore, RecencyCache};
use std::sync::Arc;
use std::time::Duration;

/// Benchmark cache puts and gets
fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_with_eviction", |b| {
        let cache = RecencyCache::new(1_000);
        let mut i = 0u64;
        b.iter(|| {
            black_box(cache.put(format!("file:{}", i), i));
            i += 1;
        });
    });

    group.bench_function("get_hit", |b| {
        let cache = RecencyCache::new(10_000);
        for i in 0..10_000u64 {
            cache.put(format!("file:{}", i), i);
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("file:{}", i % 10_000);
            black_box(cache.get(key.as_str()));
            i += 1;
        });
    });

    group.bench_function("get_miss", |b| {
        let cache: RecencyCache<String, u64> = RecencyCache::new(1_000);
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(cache.get(key.as_str()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark file store operations against in-memory collaborators
fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("store_1kb", |b| {
        let store = FileStore::in_memory(1_000);
        let value = Bytes::from("x".repeat(1024));
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("file-{}", i % 10_000);
            black_box(store.store(&name, value.clone()).unwrap());
            i += 1;
        });
    });

    group.bench_function("retrieve_cached", |b| {
        let store = FileStore::in_memory(1_000);
        for i in 0..1_000 {
            store
                .store(&format!("file-{}", i), Bytes::from("cached payload"))
                .unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("file-{}", i % 1_000);
            black_box(store.retrieve(&name).unwrap());
            i += 1;
        });
    });

    group.bench_function("retrieve_uncached", |b| {
        let store = FileStore::in_memory(0);
        for i in 0..1_000 {
            store
                .store(&format!("file-{}", i), Bytes::from("stored payload"))
                .unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("file-{}", i % 1_000);
            black_box(store.retrieve(&name).unwrap());
            i += 1;
        });
    });

    group.bench_function("list_1000", |b| {
        let store = FileStore::in_memory(16);
        for i in 0..1_000 {
            store.store(&format!("file-{}", i), Bytes::from("x")).unwrap();
        }
        b.iter(|| {
            black_box(store.list());
        });
    });

    group.finish();
}

/// Benchmark frame encoding and decoding
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    let request = RequestFrame::store("reports/2024/summary.txt", 4096);
    let encoded = encode_request(&request).unwrap();

    group.bench_function("encode_request", |b| {
        b.iter(|| black_box(encode_request(black_box(&request)).unwrap()));
    });

    group.bench_function("decode_request", |b| {
        b.iter(|| black_box(decode_request(black_box(&encoded)).unwrap()));
    });

    let response = ResponseFrame::success("File retrieved successfully", 4096);
    group.bench_function("encode_response", |b| {
        b.iter(|| black_box(encode_response(black_box(&response))));
    });

    group.finish();
}

/// Benchmark concurrent access from several threads
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_store_retrieve", |b| {
        b.iter(|| {
            let store = Arc::new(FileStore::in_memory(1_000));
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..1_000 {
                            let name = format!("file-{}-{}", t, i);
                            store.store(&name, Bytes::from("value")).unwrap();
                            store.retrieve(&name).unwrap();
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(store.total_files());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cache,
    bench_store,
    bench_codec,
    bench_concurrent,
);

criterion_main!(benches);
