//! Lock manager benchmarks, one group per concurrency mode.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use txkv_bench::utils::{generate_keys, populated_engine, random_data};
use txkv_core::manager::build_manager;
use txkv_core::{ConcurrencyMode, EngineCounters, Key, LockTable, Requester, TransactionId};

/// Benchmark uncontended read-then-write transactions.
fn bench_read_write_txn(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_write_txn");
    group.throughput(Throughput::Elements(1));

    for mode in ConcurrencyMode::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, &mode| {
            let engine = populated_engine(mode, 1_000, 64);
            let keys = generate_keys(1_000);
            let value = random_data(64);
            let mut i = 0usize;

            b.iter(|| {
                let key = keys[i % keys.len()].as_str();
                i += 1;
                engine
                    .transaction(|txn| {
                        black_box(txn.get(key)?);
                        txn.put(key, &value)
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark transactions touching many keys.
fn bench_wide_txn(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide_txn");

    for width in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(width as u64));
        for mode in [ConcurrencyMode::Optrw, ConcurrencyMode::Pesrw] {
            let id = BenchmarkId::new(mode.as_str(), width);
            group.bench_with_input(id, &width, |b, &width| {
                let engine = populated_engine(mode, width, 16);
                let keys = generate_keys(width);

                b.iter(|| {
                    engine
                        .transaction(|txn| {
                            for key in &keys {
                                black_box(txn.get(key.as_str())?);
                            }
                            Ok(())
                        })
                        .unwrap();
                });
            });
        }
    }
    group.finish();
}

/// Benchmark the raw lock table without a manager around it.
fn bench_lock_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_table");
    let keys: Vec<Key> = generate_keys(100).into_iter().map(Into::into).collect();
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("write_then_release", |b| {
        let mut table = LockTable::new();
        let mut next = 1u64;

        b.iter(|| {
            let txn = TransactionId::new(next);
            next += 1;
            table.register(txn).unwrap();
            for key in &keys {
                black_box(table.try_write(txn, key).unwrap());
            }
            table.release_all(txn);
        });
    });
    group.finish();
}

/// Benchmark disjoint writers on several threads.
fn bench_parallel_writers(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_writers");
    let threads = 4;
    let per_thread = 250;
    group.throughput(Throughput::Elements((threads * per_thread) as u64));

    for mode in [ConcurrencyMode::Optw, ConcurrencyMode::Pesw] {
        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, &mode| {
            let manager = build_manager(mode, Arc::new(EngineCounters::new()));
            let next = Arc::new(std::sync::atomic::AtomicU64::new(1));

            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let manager = Arc::clone(&manager);
                        let next = Arc::clone(&next);
                        thread::spawn(move || {
                            for i in 0..per_thread {
                                let id = next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                                let requester = Requester::new(TransactionId::new(id), None);
                                manager.register(requester.id).unwrap();
                                let key = Key::from(format!("t{t}-{i}"));
                                manager.write_lock(&requester, &key).unwrap();
                                manager.release_all(requester.id);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_read_write_txn,
    bench_wide_txn,
    bench_lock_table,
    bench_parallel_writers,
);
criterion_main!(benches);
