//! Throughput Benchmark for tempkey
//!
//! This benchmark measures the performance of key buckets under various
//! workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempkey::keyspace::{EntryKind, KeyBucket, KeySpacePartition, PartitionConfig, UNLIMITED_USES};

const LIFETIME: Duration = Duration::from_secs(3600);

fn far_future() -> SystemTime {
    SystemTime::now() + Duration::from_secs(365 * 24 * 3600)
}

/// A two-character bucket with every key in use.
fn full_len2_bucket() -> KeyBucket {
    let bucket = KeyBucket::fixed("bench.example", 2, LIFETIME);
    while bucket
        .insert(EntryKind::Url, Bytes::from("https://example.com/"), false, UNLIMITED_USES, None)
        .is_ok()
    {}
    bucket
}

/// Benchmark insert operations
fn bench_insert(c: &mut Criterion) {
    let bucket = KeyBucket::fixed("bench.example", 3, LIFETIME);

    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert_len3", |b| {
        let payload = Bytes::from("https://example.com/some/long/path?with=query");
        b.iter(|| {
            match bucket.insert(EntryKind::Url, payload.clone(), false, UNLIMITED_USES, None) {
                Ok(allocation) => {
                    black_box(allocation);
                }
                // Pool exhausted, free every key and keep going
                Err(_) => {
                    bucket.expire_due(far_future());
                }
            }
        });
    });

    group.bench_function("insert_custom", |b| {
        let custom = KeyBucket::custom("bench.example", 10_000, LIFETIME);
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("custom-{}", i % 10_000);
            if custom
                .insert(EntryKind::Text, Bytes::from("text"), false, UNLIMITED_USES, Some(key))
                .is_err()
            {
                custom.expire_due(far_future());
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark lookup operations
fn bench_lookup(c: &mut Criterion) {
    let bucket = full_len2_bucket();
    let keys: Vec<String> = bucket.snapshot().into_iter().map(|entry| entry.key).collect();

    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(1));

    group.bench_function("lookup_existing", |b| {
        let mut i = 0usize;
        b.iter(|| {
            black_box(bucket.lookup(&keys[i % keys.len()]));
            i += 1;
        });
    });

    group.bench_function("lookup_missing", |b| {
        let empty = KeyBucket::fixed("bench.example", 2, LIFETIME);
        let mut i = 0usize;
        b.iter(|| {
            black_box(empty.lookup(&keys[i % keys.len()]));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark expiry operations
fn bench_expiry(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiry");

    group.bench_function("expire_due_nothing_due", |b| {
        let bucket = full_len2_bucket();
        b.iter(|| {
            black_box(bucket.expire_due(SystemTime::now()));
        });
    });

    let capacity = full_len2_bucket().len();
    group.throughput(Throughput::Elements(capacity as u64));
    group.bench_function("expire_due_drain_len2", |b| {
        b.iter_batched(
            full_len2_bucket,
            |bucket| black_box(bucket.expire_due(far_future())),
            BatchSize::LargeInput,
        );
    });

    group.bench_function("snapshot_len2", |b| {
        let bucket = full_len2_bucket();
        b.iter(|| {
            black_box(bucket.snapshot());
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let config = PartitionConfig {
        clear1: LIFETIME,
        clear2: LIFETIME,
        clear3: LIFETIME,
        clear_custom: LIFETIME,
        max_custom_links: 1000,
    };

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_quick_add_lookup", |b| {
        b.iter(|| {
            let partition = Arc::new(KeySpacePartition::new("bench.example", &config));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let partition = Arc::clone(&partition);
                    thread::spawn(move || {
                        for _ in 0..2_500 {
                            if let Ok(allocation) =
                                partition.quick_add(Bytes::from("https://example.com/"), false, None)
                            {
                                partition.lookup(&allocation.key);
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(partition);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_lookup,
    bench_expiry,
    bench_concurrent,
);

criterion_main!(benches);
