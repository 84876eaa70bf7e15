//! Contention workloads against every locking mode.

use std::time::Duration;
use txkv_core::ConcurrencyMode;
use txkv_testkit::{run_and_verify, StressConfig, TestEngine, LOCKING_MODES};

#[test]
fn counters_add_up_under_contention() {
    let config = StressConfig {
        threads: 8,
        transactions_per_thread: 100,
        keys: 6,
        keys_per_transaction: 3,
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    };

    for mode in LOCKING_MODES {
        let engine = TestEngine::memory(mode);
        let (result, total) = run_and_verify(&engine, &config);
        result.print_summary("counters_add_up_under_contention");

        assert_eq!(result.attempted, 800);
        assert_eq!(result.other_errors, 0);
        assert_eq!(total, result.committed as u64 * 3);

        let stats = engine.stats();
        assert_eq!(stats.held_locks, 0);
        assert_eq!(stats.waiting_transactions, 0);
        // One autocommit read per counter during verification.
        assert_eq!(
            stats.transactions_committed,
            (result.committed + config.keys) as u64
        );
    }
}

#[test]
fn pessimistic_deadlocks_are_resolved_not_timed_out() {
    // Long deadlines: any cycle must be broken by the detector well before.
    let config = StressConfig {
        threads: 6,
        transactions_per_thread: 60,
        keys: 3,
        keys_per_transaction: 2,
        timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    };

    for mode in [ConcurrencyMode::Pesw, ConcurrencyMode::Pesrw] {
        let engine = TestEngine::memory(mode);
        let (result, _) = run_and_verify(&engine, &config);
        assert_eq!(result.timeouts, 0, "{mode}: {result:?}");
        assert_eq!(result.conflicts, 0, "{mode}: {result:?}");
        assert_eq!(result.committed + result.deadlocks, 360);
        assert_eq!(engine.stats().deadlocks, result.deadlocks as u64);
    }
}

#[test]
fn file_backend_keeps_committed_increments() {
    let config = StressConfig {
        threads: 4,
        transactions_per_thread: 25,
        keys: 4,
        ..Default::default()
    };
    let engine = TestEngine::file(ConcurrencyMode::Pesrw);
    let (_, total) = run_and_verify(&engine, &config);

    let reopened = engine.reopen(ConcurrencyMode::Optrw);
    assert_eq!(txkv_testkit::counter_total(&reopened, config.keys).unwrap(), total);
}
