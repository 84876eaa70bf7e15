use super::{describe_holders, ConcurrencyManager, Requester};
use crate::config::ConcurrencyMode;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockOutcome, LockTable};
use crate::stats::EngineCounters;
use crate::types::{Key, LockType, TransactionId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Manager for OPTW and OPTRW: conflicts fail immediately.
///
/// In OPTW, reads take no locks and two writers to the same key conflict.
/// In OPTRW, reads take shared locks as well, so a writer also conflicts
/// with readers and a reader with a writer. Upgrading READ to WRITE
/// succeeds only for the sole reader.
#[derive(Debug)]
pub struct OptimisticManager {
    mode: ConcurrencyMode,
    table: Mutex<LockTable>,
    counters: Arc<EngineCounters>,
}

impl OptimisticManager {
    /// Creates a manager for `mode` (OPTW or OPTRW).
    #[must_use]
    pub fn new(mode: ConcurrencyMode, counters: Arc<EngineCounters>) -> Self {
        debug_assert!(mode.is_optimistic());
        Self {
            mode,
            table: Mutex::new(LockTable::new()),
            counters,
        }
    }

    fn acquire(&self, requester: &Requester, key: &Key, wanted: LockType) -> CoreResult<()> {
        let mut table = self.table.lock();
        let upgrading =
            wanted == LockType::Write && table.held(requester.id, key) == Some(LockType::Read);
        match table.try_acquire(requester.id, key, wanted)? {
            LockOutcome::Granted => Ok(()),
            LockOutcome::Conflict { holders } => {
                drop(table);
                self.counters.record_conflict();
                let reason = if upgrading {
                    format!("cannot upgrade, also read by {}", describe_holders(&holders))
                } else {
                    format!("held by {}", describe_holders(&holders))
                };
                tracing::debug!(txn = %requester.id, %key, %wanted, %reason, "lock conflict");
                Err(CoreError::conflict(requester.id, key, wanted, reason))
            }
        }
    }
}

impl ConcurrencyManager for OptimisticManager {
    fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    fn register(&self, txn: TransactionId) -> CoreResult<()> {
        self.table.lock().register(txn)
    }

    fn read_lock(&self, requester: &Requester, key: &Key) -> CoreResult<()> {
        if !self.mode.tracks_reads() {
            return Ok(());
        }
        self.acquire(requester, key, LockType::Read)
    }

    fn write_lock(&self, requester: &Requester, key: &Key) -> CoreResult<()> {
        self.acquire(requester, key, LockType::Write)
    }

    fn write_lock_now_or_fail(&self, requester: &Requester, key: &Key) -> CoreResult<()> {
        self.acquire(requester, key, LockType::Write)
    }

    fn release_all(&self, txn: TransactionId) -> usize {
        self.table.lock().release_all(txn)
    }

    fn held_lock(&self, txn: TransactionId, key: &Key) -> Option<LockType> {
        self.table.lock().held(txn, key)
    }

    fn held_lock_count(&self) -> usize {
        self.table.lock().lock_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(mode: ConcurrencyMode) -> OptimisticManager {
        let manager = OptimisticManager::new(mode, Arc::new(EngineCounters::new()));
        for id in 1..=3 {
            manager.register(TransactionId::new(id)).unwrap();
        }
        manager
    }

    fn req(id: u64) -> Requester {
        Requester::new(TransactionId::new(id), None)
    }

    #[test]
    fn optw_reads_take_no_locks() {
        let m = manager(ConcurrencyMode::Optw);
        let key = Key::from("k1");
        m.write_lock(&req(1), &key).unwrap();
        m.read_lock(&req(2), &key).unwrap();
        assert_eq!(m.held_lock(req(2).id, &key), None);
        assert_eq!(m.held_lock_count(), 1);
    }

    #[test]
    fn optw_second_writer_conflicts() {
        let m = manager(ConcurrencyMode::Optw);
        let key = Key::from("k1");
        m.write_lock(&req(1), &key).unwrap();
        let err = m.write_lock(&req(2), &key).unwrap_err();
        assert!(matches!(err, CoreError::LockConflict { .. }));
        assert_eq!(m.counters.conflicts(), 1);

        m.release_all(req(1).id);
        m.write_lock(&req(2), &key).unwrap();
    }

    #[test]
    fn optrw_reader_blocks_writer_and_writer_blocks_reader() {
        let m = manager(ConcurrencyMode::Optrw);
        let key = Key::from("k1");
        m.read_lock(&req(1), &key).unwrap();
        assert!(m.write_lock(&req(2), &key).is_err());
        m.release_all(req(1).id);

        m.write_lock(&req(2), &key).unwrap();
        let err = m.read_lock(&req(3), &key).unwrap_err();
        assert!(err.to_string().contains("held by txn:2"));
    }

    #[test]
    fn optrw_upgrade() {
        let m = manager(ConcurrencyMode::Optrw);
        let key = Key::from("k1");
        m.read_lock(&req(1), &key).unwrap();
        m.write_lock(&req(1), &key).unwrap();
        assert_eq!(m.held_lock(req(1).id, &key), Some(LockType::Write));

        let other = Key::from("k2");
        m.read_lock(&req(1), &other).unwrap();
        m.read_lock(&req(2), &other).unwrap();
        let err = m.write_lock(&req(1), &other).unwrap_err();
        assert!(err.to_string().contains("cannot upgrade"));
        assert_eq!(m.held_lock(req(1).id, &other), Some(LockType::Read));
    }

    #[test]
    fn released_transaction_is_closed() {
        let m = manager(ConcurrencyMode::Optrw);
        m.release_all(req(1).id);
        let err = m.write_lock(&req(1), &Key::from("k")).unwrap_err();
        assert!(matches!(err, CoreError::TransactionClosed { .. }));
    }
}
