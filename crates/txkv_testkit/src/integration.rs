//! Integration test helpers.
//!
//! Provides a shadow-model harness and reusable lock-behavior scenarios
//! that tests run against every concurrency mode.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use txkv_core::{ConcurrencyEngine, CoreError, CoreResult, Key, Transaction, TransactionId};

const AUTO: TransactionId = TransactionId::AUTOCOMMIT;

/// A test harness that mirrors committed state in a map.
pub struct IntegrationHarness {
    /// The engine instance.
    pub engine: ConcurrencyEngine,
    /// Expected committed values.
    expected: HashMap<Key, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a harness over an engine.
    pub fn new(engine: ConcurrencyEngine) -> Self {
        Self {
            engine,
            expected: HashMap::new(),
        }
    }

    /// Puts a key in its own transaction and tracks it.
    pub fn put(&mut self, key: impl Into<Key>, value: &[u8]) {
        let key = key.into();
        self.engine
            .put(AUTO, key.clone(), value)
            .expect("Failed to put key");
        self.expected.insert(key, value.to_vec());
    }

    /// Removes a key in its own transaction and updates tracking.
    pub fn remove(&mut self, key: impl Into<Key>) {
        let key = key.into();
        self.engine
            .remove(AUTO, key.clone())
            .expect("Failed to remove key");
        self.expected.remove(&key);
    }

    /// Verifies every tracked key holds its expected value.
    pub fn verify_all(&self) {
        for (key, expected) in &self.expected {
            let actual = self.engine.get(AUTO, key.clone()).expect("Failed to get key");
            assert_eq!(actual.as_ref(), Some(expected), "Value mismatch for {key}");
        }
        assert_eq!(
            self.engine.key_count().expect("Failed to count keys"),
            self.expected.len(),
            "Unexpected keys in the backend"
        );
    }

    /// Returns the count of tracked keys.
    pub fn tracked_count(&self) -> usize {
        self.expected.len()
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {what}"
        );
        thread::sleep(Duration::from_millis(2));
    }
}

/// Lock behavior scenarios shared by the per-mode tests.
pub mod lock_scenarios {
    use super::*;

    /// Two transactions write the same key; exactly one can hold it.
    ///
    /// Optimistic modes refuse the second writer at once. Pessimistic modes
    /// block it until the first commits, after which its write lands last.
    pub fn write_write_exclusion(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(None).expect("begin t1");
        t1.put("k1", b"t1").expect("t1 write");

        if engine.mode().is_optimistic() {
            let t2 = engine.begin(None).expect("begin t2");
            let err = t2.put("k1", b"t2").expect_err("second writer must conflict");
            assert!(matches!(err, CoreError::LockConflict { .. }), "got {err}");
            t1.commit().expect("t1 commit");
            t2.put("k1", b"t2").expect("write after release");
            t2.commit().expect("t2 commit");
        } else if engine.mode().is_pessimistic() {
            let (started, blocked) = mpsc::channel();
            let writer = {
                let engine = engine.clone();
                thread::spawn(move || {
                    let t2 = engine.begin(Some(Duration::from_secs(10))).expect("begin t2");
                    started.send(()).expect("signal");
                    t2.put("k1", b"t2").expect("blocked write completes");
                    t2.commit().expect("t2 commit");
                })
            };
            blocked.recv().expect("writer started");
            wait_until("the writer to block", || engine.stats().waiting_transactions == 1);
            t1.commit().expect("t1 commit");
            writer.join().expect("writer thread");
        } else {
            t1.commit().expect("t1 commit");
            engine.put(AUTO, "k1", b"t2").expect("unlocked write");
        }

        assert_eq!(
            engine.get(AUTO, "k1").expect("final read"),
            Some(b"t2".to_vec())
        );
        assert_eq!(engine.stats().held_locks, 0);
    }

    /// Any number of transactions may read the same key together.
    pub fn read_sharing(engine: &ConcurrencyEngine) {
        engine.put(AUTO, "shared", b"v").expect("seed");
        let readers: Vec<_> = (0..4)
            .map(|_| engine.begin(Some(Duration::from_secs(1))).expect("begin reader"))
            .collect();
        for reader in &readers {
            assert_eq!(reader.get("shared").expect("shared read"), Some(b"v".to_vec()));
        }
        for reader in readers {
            reader.commit().expect("reader commit");
        }
    }

    /// A sole reader upgrades; a second reader blocks the upgrade.
    pub fn upgrade_rule(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(Some(Duration::from_millis(50))).expect("begin t1");
        t1.get("u").expect("t1 read");
        t1.put("u", b"1").expect("sole reader upgrades");
        t1.commit().expect("t1 commit");

        if !engine.mode().tracks_reads() {
            return;
        }

        let t1 = engine.begin(Some(Duration::from_millis(50))).expect("begin t1");
        let t2 = engine.begin(Some(Duration::from_millis(50))).expect("begin t2");
        t1.get("u").expect("t1 read");
        t2.get("u").expect("t2 read");
        let err = t1.put("u", b"2").expect_err("upgrade must fail with a second reader");
        assert!(err.is_lock_failure(), "got {err}");
        t2.rollback().expect("t2 rollback");
        t1.put("u", b"2").expect("upgrade after the other reader left");
        t1.commit().expect("t1 commit");

        if !engine.mode().is_pessimistic() {
            return;
        }

        // A blocked upgrade is granted once the other reader commits.
        let t1 = engine.begin(Some(Duration::from_secs(10))).expect("begin t1");
        let t2 = engine.begin(Some(Duration::from_secs(10))).expect("begin t2");
        t1.get("u").expect("t1 read");
        t2.get("u").expect("t2 read");
        let upgrade = thread::spawn(move || {
            t1.put("u", b"3")?;
            t1.commit()
        });
        wait_until("the upgrade to block", || engine.stats().waiting_transactions == 1);
        t2.commit().expect("t2 commit");
        upgrade
            .join()
            .expect("upgrade thread")
            .expect("upgrade granted after the other reader committed");
        assert_eq!(engine.get(AUTO, "u").expect("read u"), Some(b"3".to_vec()));
    }

    /// Two readers that both upgrade wait on each other: exactly one is
    /// chosen as the deadlock victim and the other's write commits.
    pub fn upgrade_deadlock(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(Some(Duration::from_secs(10))).expect("begin t1");
        let t2 = engine.begin(Some(Duration::from_secs(10))).expect("begin t2");
        t1.get("u").expect("t1 read");
        t2.get("u").expect("t2 read");

        let first = thread::spawn(move || upgrade_or_yield(t1, b"t1"));
        wait_until("the first upgrade to block", || engine.stats().waiting_transactions == 1);
        let t2_won = upgrade_or_yield(t2, b"t2").expect("t2 finish");
        let t1_won = first.join().expect("t1 thread").expect("t1 finish");

        assert!(t1_won ^ t2_won, "exactly one upgrade must survive");
        assert_eq!(engine.stats().deadlocks, 1);
        assert_eq!(engine.stats().held_locks, 0);
        let winner: &[u8] = if t1_won { b"t1" } else { b"t2" };
        assert_eq!(engine.get(AUTO, "u").expect("read u"), Some(winner.to_vec()));
    }

    /// Upgrades `u` and commits, or rolls back if picked as a deadlock victim.
    fn upgrade_or_yield(txn: Transaction, value: &[u8]) -> CoreResult<bool> {
        match txn.put("u", value) {
            Ok(()) => txn.commit().map(|()| true),
            Err(err) => {
                assert!(matches!(err, CoreError::Deadlock { .. }), "got {err}");
                txn.rollback().map(|()| false)
            }
        }
    }

    /// Closing a transaction releases everything; a second close is refused
    /// without touching the table.
    pub fn idempotent_release(engine: &ConcurrencyEngine) {
        let h = engine.begin_handle(None).expect("begin");
        engine.put(h, "a", b"1").expect("write a");
        engine.get(h, "b").expect("read b");
        engine.commit(h).expect("commit");
        assert_eq!(engine.stats().held_locks, 0);
        assert!(engine.commit(h).is_err());
        assert!(engine.rollback(h).is_err());
        assert_eq!(engine.stats().held_locks, 0);
    }

    /// A READ-then-write conflict under OPTRW fails at once and succeeds
    /// after the reader finishes.
    pub fn optimistic_read_then_write(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(None).expect("begin t1");
        let t2 = engine.begin(None).expect("begin t2");
        t1.get("k1").expect("t1 read");
        let start = Instant::now();
        let err = t2.put("k1", b"v").expect_err("write must conflict with reader");
        assert!(matches!(err, CoreError::LockConflict { .. }), "got {err}");
        assert!(start.elapsed() < Duration::from_millis(500), "conflict must not wait");
        t1.commit().expect("t1 commit");
        t2.put("k1", b"v").expect("write after reader left");
        t2.commit().expect("t2 commit");
    }

    /// Two transactions lock two keys in opposite order; exactly one is
    /// chosen as the deadlock victim and the other completes.
    pub fn deadlock_resolution(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(Some(Duration::from_secs(10))).expect("begin t1");
        t1.put("a", b"t1").expect("t1 takes a");

        let (holding_b, t2_ready) = mpsc::channel();
        let other = {
            let engine = engine.clone();
            thread::spawn(move || {
                let t2 = engine.begin(Some(Duration::from_secs(10))).expect("begin t2");
                t2.put("b", b"t2").expect("t2 takes b");
                holding_b.send(()).expect("signal");
                match t2.put("a", b"t2") {
                    Ok(()) => t2.commit().map(|()| true),
                    Err(err) => {
                        assert!(matches!(err, CoreError::Deadlock { .. }), "got {err}");
                        t2.rollback().map(|()| false)
                    }
                }
            })
        };

        t2_ready.recv().expect("t2 holds b");
        let t1_won = match t1.put("b", b"t1") {
            Ok(()) => {
                t1.commit().expect("t1 commit");
                true
            }
            Err(err) => {
                assert!(matches!(err, CoreError::Deadlock { .. }), "got {err}");
                t1.rollback().expect("t1 rollback");
                false
            }
        };
        let t2_won = other.join().expect("t2 thread").expect("t2 finish");

        assert!(t1_won ^ t2_won, "exactly one transaction must survive");
        assert_eq!(engine.stats().deadlocks, 1);
        let winner: &[u8] = if t1_won { b"t1" } else { b"t2" };
        assert_eq!(engine.get(AUTO, "a").expect("read a"), Some(winner.to_vec()));
        assert_eq!(engine.get(AUTO, "b").expect("read b"), Some(winner.to_vec()));
    }

    /// `write_lock_now_or_fail` refuses at once against a held WRITE lock.
    pub fn now_or_fail_against_writer(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(None).expect("begin t1");
        t1.put("k1", b"v").expect("t1 write");

        let sweeper = engine.begin(None).expect("begin sweeper");
        let start = Instant::now();
        let err = sweeper
            .write_lock_now_or_fail("k1")
            .expect_err("must fail while t1 holds k1");
        assert!(matches!(err, CoreError::LockConflict { .. }), "got {err}");
        assert!(start.elapsed() < Duration::from_millis(500), "must not wait");

        t1.commit().expect("t1 commit");
        sweeper.write_lock_now_or_fail("k1").expect("free after commit");
        sweeper.rollback().expect("sweeper rollback");
    }

    /// A pessimistic wait ends with `LockTimeout` at the deadline and the
    /// transaction stays active.
    pub fn timeout_leaves_transaction_active(engine: &ConcurrencyEngine) {
        let t1 = engine.begin(None).expect("begin t1");
        t1.put("k1", b"v").expect("t1 write");

        let t2 = engine.begin(Some(Duration::from_millis(50))).expect("begin t2");
        let err = t2.put("k1", b"w").expect_err("must time out");
        assert!(matches!(err, CoreError::LockTimeout { .. }), "got {err}");
        assert!(t2.is_active());
        t2.rollback().expect("t2 rollback");
        t1.commit().expect("t1 commit");
        assert_eq!(engine.stats().timeouts, 1);
    }
}
