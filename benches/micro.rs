//! Micro-benchmarks for stratumdb core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- set       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use stratumdb::{Config, Database};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

/// Format a zero-padded key.
fn make_key(i: u64) -> String {
    format!("key-{i:012}")
}

/// Open a database with a tiny memtable threshold so flushes (and new
/// L0 tables) happen quickly during sustained-write benchmarks.
fn open_small_buffer(dir: &std::path::Path) -> Database {
    let config = Config::default()
        .with_memtable_threshold_bytes(4 * 1024)
        .with_l0_compaction_trigger(1000);
    Database::open(dir, config).expect("open")
}

/// Open a database with a large memtable threshold so all data stays
/// in the memtable (no background flushes).
fn open_memtable_only(dir: &std::path::Path) -> Database {
    let config = Config::default().with_memtable_threshold_bytes(64 * 1024 * 1024);
    Database::open(dir, config).expect("open")
}

/// Pre-populate a database with `count` sequential keys and close it,
/// so SSTables exist on disk.
fn prepopulate(dir: &std::path::Path, count: u64, value: &[u8]) {
    let db = open_small_buffer(dir);
    for i in 0..count {
        db.set(make_key(i), value.to_vec()).unwrap();
    }
    db.close().unwrap();
}

// ================================================================================================
// Write benchmarks
// ================================================================================================

/// Benchmark group for write (`set`) operations.
///
/// # Sub-benchmarks
///
/// ## `memtable_only/128B` and `memtable_only/1K`
///
/// **Scenario:** Inserts a single key-value pair into a database configured with a 64 MiB
/// memtable threshold, ensuring no flush occurs during measurement.
///
/// **What it measures:** The raw cost of writing to the WAL and inserting into the skip-list
/// memtable. Two payload sizes (128 B and 1 KiB) reveal how throughput scales with value size.
///
/// **Expected behaviour:** Dominated by the WAL `fsync`; 1 KiB values should be only
/// marginally slower than 128 B because the fsync cost dwarfs the memcpy.
///
/// ## `sequential_with_flush`
///
/// **Scenario:** Continuously writes 128 B values with a tiny 4 KiB memtable threshold that
/// forces frequent flushes and SSTable creation.
///
/// **What it measures:** Sustained write throughput including the amortised cost of flushes
/// and SSTable builds. This reflects real-world write-heavy workloads.
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for &(label, value) in &[("128B", VALUE_128B.as_slice()), ("1K", VALUE_1K.as_slice())] {
        group.bench_function(BenchmarkId::new("memtable_only", label), |b| {
            let dir = TempDir::new().unwrap();
            let db = open_memtable_only(dir.path());
            let mut seq = 0u64;

            b.iter(|| {
                let key = make_key(seq);
                db.set(black_box(key), black_box(value.to_vec())).unwrap();
                seq += 1;
            });

            db.close().unwrap();
        });
    }

    group.bench_function("sequential_with_flush", |b| {
        let dir = TempDir::new().unwrap();
        let db = open_small_buffer(dir.path());
        let mut seq = 0u64;

        b.iter(|| {
            let key = make_key(seq);
            db.set(black_box(key), black_box(VALUE_128B.to_vec())).unwrap();
            seq += 1;
        });

        db.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Read benchmarks
// ================================================================================================

/// Benchmark group for read (`get`) operations.
///
/// # Sub-benchmarks
///
/// ## `memtable_hit`
///
/// **Scenario:** Reads randomly from 10,000 keys that all reside in the active memtable
/// (64 MiB threshold, nothing flushed).
///
/// **What it measures:** Pure in-memory skip-list lookup latency — the fastest read path in
/// the engine.
///
/// ## `memtable_miss`
///
/// **Scenario:** Queries keys that were never inserted while the memtable contains 10,000
/// entries.
///
/// **What it measures:** The overhead of the negative-lookup path through the skip list.
///
/// ## `sstable_hit`
///
/// **Scenario:** Reads randomly from 5,000 keys that have been flushed to SSTables. The
/// database is reopened so the memtable is empty.
///
/// **What it measures:** Full on-disk read path: bloom filter probe -> index lookup ->
/// data-block read -> decompress -> binary search within the block.
///
/// ## `sstable_miss`
///
/// **Scenario:** Queries keys that do not exist in any SSTable (5,000 keys on disk, queries
/// target IDs above that range).
///
/// **What it measures:** Bloom filter effectiveness. A well-tuned bloom filter should reject
/// the vast majority of non-existent queries without touching the data blocks.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    {
        let dir = TempDir::new().unwrap();
        let db = open_memtable_only(dir.path());
        let n = 10_000u64;
        for i in 0..n {
            db.set(make_key(i), VALUE_128B.to_vec()).unwrap();
        }

        group.bench_function("memtable_hit", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % n);
                let _ = black_box(db.get(black_box(&key)).unwrap());
                i += 1;
            });
        });

        group.bench_function("memtable_miss", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(n + i);
                let _ = black_box(db.get(black_box(&key)).unwrap());
                i += 1;
            });
        });

        db.close().unwrap();
    }

    {
        let dir = TempDir::new().unwrap();
        let n = 5_000u64;
        prepopulate(dir.path(), n, VALUE_128B);
        let db = Database::open(dir.path(), Config::default()).unwrap();

        group.bench_function("sstable_hit", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(i % n);
                let _ = black_box(db.get(black_box(&key)).unwrap());
                i += 1;
            });
        });

        group.bench_function("sstable_miss", |b| {
            let mut i = 0u64;
            b.iter(|| {
                let key = make_key(n + i);
                let _ = black_box(db.get(black_box(&key)).unwrap());
                i += 1;
            });
        });

        db.close().unwrap();
    }

    group.finish();
}

// ================================================================================================
// Delete benchmarks
// ================================================================================================

/// Benchmark group for delete operations.
///
/// ## `point`
///
/// **Scenario:** Deletes a single unique key per iteration using a large memtable threshold
/// (no flushes).
///
/// **What it measures:** The cost of inserting a tombstone marker into the WAL and memtable.
/// Structurally identical to a `set` but writes a deletion sentinel.
fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    group.bench_function("point", |b| {
        let dir = TempDir::new().unwrap();
        let db = open_memtable_only(dir.path());
        let mut seq = 0u64;

        b.iter(|| {
            let key = make_key(seq);
            db.delete(black_box(key)).unwrap();
            seq += 1;
        });

        db.close().unwrap();
    });

    group.finish();
}

// ================================================================================================
// Compaction benchmarks
// ================================================================================================

/// Benchmark group for explicit compaction.
///
/// ## `l0_to_l1`
///
/// **Scenario:** Flushes four overlapping 2,000-key batches into L0, then times a single
/// `compact()` call that drains L0 into L1.
///
/// **What it measures:** The cost of a k-way merge across four SSTables plus a new SSTable
/// build — the dominant cost of sustained write-heavy workloads once L0 fills up.
fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(10);

    group.bench_function("l0_to_l1", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let config = Config::default().with_l0_compaction_trigger(1000);
                let db = Database::open(dir.path(), config).unwrap();
                for batch in 0..4 {
                    for i in 0..2000 {
                        db.set(format!("k{batch}-{i:05}"), VALUE_128B.to_vec()).unwrap();
                    }
                    db.flush().unwrap();
                }
                (dir, db)
            },
            |(_dir, db)| {
                db.compact().unwrap();
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_delete, bench_compact);
criterion_main!(benches);
