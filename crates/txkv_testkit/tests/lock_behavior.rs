//! Lock behavior across every concurrency mode.

use std::time::Duration;
use txkv_core::{ConcurrencyMode, CoreError, TransactionId};
use txkv_testkit::integration::lock_scenarios;
use txkv_testkit::{for_each_mode, with_engine, wait_until, IntegrationHarness, TestEngine, LOCKING_MODES};

const AUTO: TransactionId = TransactionId::AUTOCOMMIT;
const PESSIMISTIC: [ConcurrencyMode; 2] = [ConcurrencyMode::Pesw, ConcurrencyMode::Pesrw];

#[test]
fn write_write_exclusion_in_every_mode() {
    for_each_mode(lock_scenarios::write_write_exclusion);
}

#[test]
fn readers_share_in_every_mode() {
    for_each_mode(lock_scenarios::read_sharing);
}

#[test]
fn upgrade_rule_in_every_mode() {
    for_each_mode(lock_scenarios::upgrade_rule);
}

#[test]
fn release_is_idempotent_in_every_mode() {
    for_each_mode(lock_scenarios::idempotent_release);
}

#[test]
fn optrw_read_then_write_conflicts() {
    with_engine(ConcurrencyMode::Optrw, lock_scenarios::optimistic_read_then_write);
}

#[test]
fn optw_reads_do_not_conflict_with_writes() {
    with_engine(ConcurrencyMode::Optw, |engine| {
        let t1 = engine.begin(None).unwrap();
        let t2 = engine.begin(None).unwrap();
        t1.get("k1").unwrap();
        t2.put("k1", b"v").unwrap();
        t2.commit().unwrap();
        t1.commit().unwrap();
    });
}

#[test]
fn now_or_fail_refuses_held_writes() {
    for mode in LOCKING_MODES {
        with_engine(mode, lock_scenarios::now_or_fail_against_writer);
    }
}

#[test]
fn pessimistic_deadlocks_pick_one_victim() {
    for mode in PESSIMISTIC {
        with_engine(mode, lock_scenarios::deadlock_resolution);
    }
}

#[test]
fn pessimistic_upgrades_deadlock_with_one_victim() {
    with_engine(ConcurrencyMode::Pesrw, lock_scenarios::upgrade_deadlock);
}

#[test]
fn pessimistic_timeouts_keep_the_transaction() {
    for mode in PESSIMISTIC {
        with_engine(mode, lock_scenarios::timeout_leaves_transaction_active);
    }
}

#[test]
fn handle_api_autocommit_and_explicit() {
    for_each_mode(|engine| {
        engine.put(AUTO, "k", b"auto").unwrap();
        let h = engine.begin_handle(None).unwrap();
        assert!(!h.is_autocommit());
        engine.put(h, "k", b"explicit").unwrap();
        assert!(engine.lock(h, "other").unwrap());
        engine.commit(h).unwrap();

        assert_eq!(engine.get(AUTO, "k").unwrap(), Some(b"explicit".to_vec()));
        assert!(matches!(
            engine.get(h, "k"),
            Err(CoreError::UnknownTransaction { .. })
        ));
        assert_eq!(engine.active_count(), 0);
    });
}

#[test]
fn lock_returns_false_on_conflict() {
    with_engine(ConcurrencyMode::Optw, |engine| {
        let h1 = engine.begin_handle(None).unwrap();
        let h2 = engine.begin_handle(None).unwrap();
        assert!(engine.lock(h1, "k").unwrap());
        assert!(!engine.lock(h2, "k").unwrap());
        engine.rollback(h1).unwrap();
        assert!(engine.lock(h2, "k").unwrap());
        engine.commit(h2).unwrap();
    });
}

#[test]
fn reaper_frees_a_blocked_key() {
    with_engine(ConcurrencyMode::Pesw, |engine| {
        let stale = engine.begin_handle(Some(Duration::from_millis(20))).unwrap();
        engine.put(stale, "k", b"stale").unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(engine.reap_expired(), 1);
        assert!(matches!(
            engine.commit(stale),
            Err(CoreError::UnknownTransaction { .. })
        ));

        let h = engine.begin_handle(Some(Duration::from_millis(200))).unwrap();
        engine.put(h, "k", b"fresh").unwrap();
        engine.commit(h).unwrap();
        assert_eq!(engine.get(AUTO, "k").unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(engine.stats().transactions_reaped, 1);
    });
}

#[test]
fn close_wakes_blocked_waiters() {
    with_engine(ConcurrencyMode::Pesrw, |engine| {
        let holder = engine.begin(None).unwrap();
        holder.put("k", b"v").unwrap();

        let waiter = {
            let engine = engine.clone();
            std::thread::spawn(move || {
                let txn = engine.begin(None).unwrap();
                txn.put("k", b"w")
            })
        };
        wait_until("the waiter to block", || engine.stats().waiting_transactions == 1);
        engine.close();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.is_lock_failure() || matches!(err, CoreError::TransactionClosed { .. }));
        assert!(!engine.is_open());
        assert!(matches!(engine.begin(None), Err(CoreError::EngineClosed)));
    });
}

#[test]
fn expired_keys_are_swept() {
    for_each_mode(|engine| {
        engine
            .put_with_ttl(AUTO, "session", b"s", Duration::from_millis(10))
            .unwrap();
        engine.put(AUTO, "durable", b"d").unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let report = engine.sweep_expired().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(engine.get(AUTO, "session").unwrap(), None);
        assert_eq!(engine.get(AUTO, "durable").unwrap(), Some(b"d".to_vec()));
    });
}

#[test]
fn sweep_skips_keys_held_by_writers() {
    for mode in LOCKING_MODES {
        with_engine(mode, |engine| {
            engine
                .put_with_ttl(AUTO, "session", b"s", Duration::from_millis(10))
                .unwrap();
            let writer = engine.begin(None).unwrap();
            writer.lock("session").unwrap();
            std::thread::sleep(Duration::from_millis(30));

            let report = engine.sweep_expired().unwrap();
            assert_eq!(report.skipped, 1, "{mode}");
            writer.rollback().unwrap();

            let report = engine.sweep_expired().unwrap();
            assert_eq!(report.expired, 1, "{mode}");
        });
    }
}

#[test]
fn shadow_model_survives_reopen() {
    let test_engine = TestEngine::file(ConcurrencyMode::Pesrw);
    let mut harness = IntegrationHarness::new(test_engine.engine.clone());
    for i in 0..20 {
        harness.put(format!("key-{i}"), format!("value-{i}").as_bytes());
    }
    for i in (0..20).step_by(3) {
        harness.remove(format!("key-{i}"));
    }
    harness.verify_all();
    drop(harness);

    let reopened = test_engine.reopen(ConcurrencyMode::Optw);
    assert_eq!(reopened.key_count().unwrap(), 13);
    assert_eq!(
        reopened.get(AUTO, "key-1").unwrap(),
        Some(b"value-1".to_vec())
    );
    assert_eq!(reopened.get(AUTO, "key-0").unwrap(), None);
}
