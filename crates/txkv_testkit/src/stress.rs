//! Stress tests for txkv.
//!
//! Runs many threads of short read-modify-write transactions over a small
//! set of counter keys. In every locking mode the committed increments must
//! all be visible afterwards: a lost update means the lock manager let two
//! writers overlap.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use txkv_core::{ConcurrencyEngine, ConcurrencyMode, CoreError, CoreResult, TransactionId};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Mode the engine ran in.
    pub mode: ConcurrencyMode,
    /// Transactions attempted.
    pub attempted: usize,
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions refused by an optimistic conflict.
    pub conflicts: usize,
    /// Transactions whose wait reached the deadline.
    pub timeouts: usize,
    /// Transactions chosen as deadlock victims.
    pub deadlocks: usize,
    /// Transactions that failed for any other reason.
    pub other_errors: usize,
    /// Total duration.
    pub duration: Duration,
    /// Committed transactions per second.
    pub commits_per_second: f64,
}

impl StressTestResult {
    fn new(mode: ConcurrencyMode, tally: &Tally, duration: Duration) -> Self {
        let committed = tally.committed.load(Ordering::Relaxed);
        let conflicts = tally.conflicts.load(Ordering::Relaxed);
        let timeouts = tally.timeouts.load(Ordering::Relaxed);
        let deadlocks = tally.deadlocks.load(Ordering::Relaxed);
        let other_errors = tally.other.load(Ordering::Relaxed);
        let commits_per_second = if duration.as_secs_f64() > 0.0 {
            committed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            mode,
            attempted: committed + conflicts + timeouts + deadlocks + other_errors,
            committed,
            conflicts,
            timeouts,
            deadlocks,
            other_errors,
            duration,
            commits_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ({}) ===", name, self.mode);
        println!("Attempted: {}", self.attempted);
        println!("Committed: {}", self.committed);
        println!("Conflicts: {}", self.conflicts);
        println!("Timeouts: {}", self.timeouts);
        println!("Deadlocks: {}", self.deadlocks);
        println!("Other errors: {}", self.other_errors);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} commits/sec", self.commits_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transactions each thread runs.
    pub transactions_per_thread: usize,
    /// Number of distinct counter keys.
    pub keys: usize,
    /// Counters incremented by each transaction.
    pub keys_per_transaction: usize,
    /// Lock-wait timeout for each transaction.
    pub timeout: Option<Duration>,
    /// Seed for the per-thread key choice.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transactions_per_thread: 250,
            keys: 8,
            keys_per_transaction: 2,
            timeout: Some(Duration::from_secs(2)),
            seed: 0x7478_6b76,
        }
    }
}

#[derive(Default)]
struct Tally {
    committed: AtomicUsize,
    conflicts: AtomicUsize,
    timeouts: AtomicUsize,
    deadlocks: AtomicUsize,
    other: AtomicUsize,
}

impl Tally {
    fn record(&self, outcome: &CoreResult<()>) {
        let counter = match outcome {
            Ok(()) => &self.committed,
            Err(CoreError::LockConflict { .. }) => &self.conflicts,
            Err(CoreError::LockTimeout { .. }) => &self.timeouts,
            Err(CoreError::Deadlock { .. }) => &self.deadlocks,
            Err(_) => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the name of counter `index`.
pub fn counter_key(index: usize) -> String {
    format!("counter-{index}")
}

/// Decodes a counter value; absent or malformed values count as zero.
pub fn decode_counter(value: Option<&[u8]>) -> u64 {
    value
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map_or(0, u64::from_le_bytes)
}

/// Sums every counter through autocommit reads.
///
/// # Errors
///
/// Returns any error from the reads.
pub fn counter_total(engine: &ConcurrencyEngine, keys: usize) -> CoreResult<u64> {
    (0..keys).try_fold(0u64, |total, i| {
        let value = engine.get(TransactionId::AUTOCOMMIT, counter_key(i))?;
        Ok(total + decode_counter(value.as_deref()))
    })
}

/// Runs one increment transaction over `keys`.
///
/// Modes without read locks take the write lock before reading, otherwise
/// the read-then-write pair could interleave with another writer.
fn increment(engine: &ConcurrencyEngine, keys: &[usize], timeout: Option<Duration>) -> CoreResult<()> {
    let txn = engine.begin(timeout)?;
    let lock_first = !engine.mode().tracks_reads();
    for &i in keys {
        let key = counter_key(i);
        if lock_first {
            txn.lock(key.as_str())?;
        }
        let current = decode_counter(txn.get(key.as_str())?.as_deref());
        txn.put(key, (current + 1).to_le_bytes())?;
    }
    txn.commit()
}

/// Runs the contention workload.
///
/// Each thread picks `keys_per_transaction` distinct counters at random, in
/// random order, so the pessimistic modes see genuine deadlocks. Failed
/// transactions roll back and are tallied by error kind.
pub fn run_contention(engine: &ConcurrencyEngine, config: &StressConfig) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let per_txn = config.keys_per_transaction.clamp(1, config.keys.max(1));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let engine = engine.clone();
            let tally = Arc::clone(&tally);
            let config = config.clone();

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                for _ in 0..config.transactions_per_thread {
                    let mut keys =
                        rand::seq::index::sample(&mut rng, config.keys, per_txn).into_vec();
                    if rng.gen_bool(0.5) {
                        keys.reverse();
                    }
                    tally.record(&increment(&engine, &keys, config.timeout));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(engine.mode(), &tally, start.elapsed())
}

/// Runs the workload and checks that no committed increment was lost.
///
/// Returns the result and the counter total observed afterwards.
///
/// # Panics
///
/// Panics in any locking mode if the total differs from the committed
/// increments.
pub fn run_and_verify(engine: &ConcurrencyEngine, config: &StressConfig) -> (StressTestResult, u64) {
    let result = run_contention(engine, config);
    let total = counter_total(engine, config.keys).expect("Failed to read counters");
    if engine.mode() != ConcurrencyMode::None {
        let per_txn = config.keys_per_transaction.clamp(1, config.keys.max(1));
        assert_eq!(
            total,
            (result.committed * per_txn) as u64,
            "lost updates in {} mode",
            engine.mode()
        );
    }
    (result, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{TestEngine, LOCKING_MODES};

    fn small_config() -> StressConfig {
        StressConfig {
            threads: 4,
            transactions_per_thread: 50,
            keys: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_thread_commits_everything() {
        let engine = TestEngine::memory(ConcurrencyMode::Optrw);
        let config = StressConfig {
            threads: 1,
            transactions_per_thread: 100,
            ..small_config()
        };

        let (result, total) = run_and_verify(&engine, &config);
        assert_eq!(result.committed, 100);
        assert_eq!(result.attempted, 100);
        assert_eq!(total, 200);
    }

    #[test]
    fn test_no_lost_updates_in_locking_modes() {
        for mode in LOCKING_MODES {
            let engine = TestEngine::memory(mode);
            let (result, _) = run_and_verify(&engine, &small_config());
            assert_eq!(result.attempted, 200);
            assert_eq!(result.other_errors, 0, "{mode}: {result:?}");
            assert!(result.committed > 0, "{mode}: nothing committed");
            assert_eq!(engine.stats().held_locks, 0);
            assert_eq!(engine.active_count(), 0);
        }
    }

    #[test]
    fn test_optimistic_modes_never_wait() {
        for mode in [ConcurrencyMode::Optw, ConcurrencyMode::Optrw] {
            let engine = TestEngine::memory(mode);
            let (result, _) = run_and_verify(&engine, &small_config());
            assert_eq!(result.timeouts, 0);
            assert_eq!(result.deadlocks, 0);
            assert_eq!(engine.stats().lock_waits, 0);
        }
    }

    #[test]
    fn test_result_serializes() {
        let engine = TestEngine::memory(ConcurrencyMode::Pesw);
        let result = run_contention(
            &engine,
            &StressConfig {
                threads: 2,
                transactions_per_thread: 10,
                ..small_config()
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mode"], "pesw");
        assert_eq!(json["attempted"], 20);
    }

    #[test]
    fn test_decode_counter() {
        assert_eq!(decode_counter(None), 0);
        assert_eq!(decode_counter(Some(b"short")), 0);
        assert_eq!(decode_counter(Some(&7u64.to_le_bytes())), 7);
    }
}
