//! Engine statistics.
//!
//! Counters are shared by the engine, its transactions and its concurrency
//! manager. Gauges (active transactions, held locks, waiters) are read from
//! live state when a snapshot is taken.
//!
//! # Usage
//!
//! ```rust,ignore
//! use txkv_core::ConcurrencyEngine;
//!
//! let engine = ConcurrencyEngine::open_in_memory(EngineConfig::default())?;
//! // ... run transactions ...
//! let stats = engine.stats();
//! println!("conflicts: {}", stats.conflicts);
//! println!("deadlocks: {}", stats.deadlocks);
//! ```

use crate::config::ConcurrencyMode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic engine counters.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct EngineCounters {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    transactions_reaped: AtomicU64,

    // Lock outcomes
    conflicts: AtomicU64,
    lock_waits: AtomicU64,
    timeouts: AtomicU64,
    deadlocks: AtomicU64,

    keys_expired: AtomicU64,
}

impl EngineCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reaped(&self) {
        self.transactions_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired_keys(&self, count: u64) {
        self.keys_expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back, for any reason.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back by the reaper.
    pub fn transactions_reaped(&self) -> u64 {
        self.transactions_reaped.load(Ordering::Relaxed)
    }

    /// Returns the number of lock requests refused with a conflict.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of lock requests that had to wait.
    pub fn lock_waits(&self) -> u64 {
        self.lock_waits.load(Ordering::Relaxed)
    }

    /// Returns the number of lock waits that timed out.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Returns the number of requests failed as deadlock victims.
    pub fn deadlocks(&self) -> u64 {
        self.deadlocks.load(Ordering::Relaxed)
    }

    /// Returns the number of keys removed by the expiry sweeper.
    pub fn keys_expired(&self) -> u64 {
        self.keys_expired.load(Ordering::Relaxed)
    }
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Concurrency mode of the engine.
    pub mode: ConcurrencyMode,
    /// Transactions currently open.
    pub active_transactions: u64,
    /// (transaction, key) locks currently held.
    pub held_locks: u64,
    /// Transactions currently blocked on a lock.
    pub waiting_transactions: u64,
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Transactions rolled back by the reaper.
    pub transactions_reaped: u64,
    /// Lock conflicts.
    pub conflicts: u64,
    /// Lock waits.
    pub lock_waits: u64,
    /// Lock timeouts.
    pub timeouts: u64,
    /// Deadlock victims.
    pub deadlocks: u64,
    /// Keys removed by expiry.
    pub keys_expired: u64,
}

impl EngineStats {
    pub(crate) fn collect(
        mode: ConcurrencyMode,
        counters: &EngineCounters,
        active_transactions: usize,
        held_locks: usize,
        waiting_transactions: usize,
    ) -> Self {
        Self {
            mode,
            active_transactions: active_transactions as u64,
            held_locks: held_locks as u64,
            waiting_transactions: waiting_transactions as u64,
            transactions_started: counters.transactions_started(),
            transactions_committed: counters.transactions_committed(),
            transactions_rolled_back: counters.transactions_rolled_back(),
            transactions_reaped: counters.transactions_reaped(),
            conflicts: counters.conflicts(),
            lock_waits: counters.lock_waits(),
            timeouts: counters.timeouts(),
            deadlocks: counters.deadlocks(),
            keys_expired: counters.keys_expired(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_counters_are_zero() {
        let counters = EngineCounters::new();
        assert_eq!(counters.transactions_started(), 0);
        assert_eq!(counters.conflicts(), 0);
        assert_eq!(counters.deadlocks(), 0);
    }

    #[test]
    fn collect_snapshot() {
        let counters = EngineCounters::new();
        counters.record_start();
        counters.record_start();
        counters.record_commit();
        counters.record_rollback();
        counters.record_conflict();
        counters.record_expired_keys(3);

        let stats = EngineStats::collect(ConcurrencyMode::Optrw, &counters, 1, 4, 0);
        assert_eq!(stats.mode, ConcurrencyMode::Optrw);
        assert_eq!(stats.active_transactions, 1);
        assert_eq!(stats.held_locks, 4);
        assert_eq!(stats.transactions_started, 2);
        assert_eq!(stats.transactions_committed, 1);
        assert_eq!(stats.transactions_rolled_back, 1);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.keys_expired, 3);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let counters = Arc::new(EngineCounters::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let c = Arc::clone(&counters);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    c.record_wait();
                    c.record_timeout();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counters.lock_waits(), 1000);
        assert_eq!(counters.timeouts(), 1000);
    }
}
