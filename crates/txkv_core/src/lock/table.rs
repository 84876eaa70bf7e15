//! Per-key lock bookkeeping.

use crate::error::{CoreError, CoreResult};
use crate::types::{Key, LockType, TransactionId};
use std::collections::HashMap;

/// Result of a single lock attempt against the table.
///
/// The table never blocks and never decides policy: optimistic managers turn
/// a conflict into an immediate error, pessimistic managers into a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock is now held (or was already held) by the requester.
    Granted,
    /// Other transactions hold incompatible locks.
    Conflict {
        /// The incompatible holders, excluding the requester.
        holders: Vec<TransactionId>,
    },
}

impl LockOutcome {
    /// Returns true if the lock was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted)
    }
}

/// The lock table: which transactions hold which locks.
///
/// Two views are kept in sync: per key, the set of holders and their lock
/// types; per transaction, the keys it holds. A transaction must be
/// registered before it can acquire anything, and [`LockTable::release_all`]
/// unregisters it, so a closed transaction can never re-enter the table.
///
/// # Invariants
///
/// - A key held for WRITE has exactly one holder
/// - Several holders on a key are all READ holders
/// - Keys without holders have no entry
///
/// The table is not synchronized; managers wrap it in a mutex and keep every
/// check-then-grant sequence under that one lock.
#[derive(Debug, Default)]
pub struct LockTable {
    keys: HashMap<Key, Vec<(TransactionId, LockType)>>,
    owned: HashMap<TransactionId, HashMap<Key, LockType>>,
}

impl LockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transaction so it may acquire locks.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the handle is already registered.
    pub fn register(&mut self, txn: TransactionId) -> CoreResult<()> {
        if self.owned.contains_key(&txn) {
            return Err(CoreError::invariant(format!(
                "handle collision: {txn} is already registered in the lock table"
            )));
        }
        self.owned.insert(txn, HashMap::new());
        Ok(())
    }

    /// Returns true if the transaction is registered.
    #[must_use]
    pub fn is_registered(&self, txn: TransactionId) -> bool {
        self.owned.contains_key(&txn)
    }

    /// Returns the lock `txn` holds on `key`, if any.
    #[must_use]
    pub fn held(&self, txn: TransactionId, key: &Key) -> Option<LockType> {
        self.owned.get(&txn).and_then(|locks| locks.get(key)).copied()
    }

    /// Returns the current holders of `key`.
    #[must_use]
    pub fn holders(&self, key: &Key) -> &[(TransactionId, LockType)] {
        self.keys.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Attempts to take the requested lock type.
    ///
    /// # Errors
    ///
    /// See [`LockTable::try_read`] and [`LockTable::try_write`].
    pub fn try_acquire(
        &mut self,
        txn: TransactionId,
        key: &Key,
        wanted: LockType,
    ) -> CoreResult<LockOutcome> {
        match wanted {
            LockType::Read => self.try_read(txn, key),
            LockType::Write => self.try_write(txn, key),
        }
    }

    /// Attempts to take a READ lock.
    ///
    /// Granted if the key has no holders or only READ holders. Because a
    /// WRITE holder is always alone, checking the first holder suffices.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed` if `txn` is not registered.
    pub fn try_read(&mut self, txn: TransactionId, key: &Key) -> CoreResult<LockOutcome> {
        if self.registered_lock(txn, key)?.is_some() {
            return Ok(LockOutcome::Granted);
        }

        let holders = self.keys.entry(key.clone()).or_default();
        match holders.first() {
            Some(&(holder, LockType::Write)) => Ok(LockOutcome::Conflict {
                holders: vec![holder],
            }),
            _ => {
                holders.push((txn, LockType::Read));
                self.record(txn, key, LockType::Read);
                Ok(LockOutcome::Granted)
            }
        }
    }

    /// Attempts to take a WRITE lock, upgrading a held READ lock.
    ///
    /// Granted if the key has no holders, or if the requester is the only
    /// holder.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed` if `txn` is not registered, or
    /// `InvariantViolation` if the two views of the table disagree.
    pub fn try_write(&mut self, txn: TransactionId, key: &Key) -> CoreResult<LockOutcome> {
        match self.registered_lock(txn, key)? {
            Some(LockType::Write) => return Ok(LockOutcome::Granted),
            Some(LockType::Read) => return self.try_upgrade(txn, key),
            None => {}
        }

        let holders = self.keys.entry(key.clone()).or_default();
        if holders.iter().any(|&(holder, _)| holder == txn) {
            return Err(CoreError::invariant(format!(
                "{txn} is listed as holder of {key} but does not own it"
            )));
        }
        if !holders.is_empty() {
            return Ok(LockOutcome::Conflict {
                holders: holders.iter().map(|&(holder, _)| holder).collect(),
            });
        }
        holders.push((txn, LockType::Write));
        self.record(txn, key, LockType::Write);
        Ok(LockOutcome::Granted)
    }

    /// Converts a READ lock held by `txn` into a WRITE lock.
    ///
    /// Granted only if `txn` is the sole holder; other readers produce a
    /// conflict naming them.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if `txn` does not hold READ on the key,
    /// or if no readers are recorded for it at all.
    pub fn try_upgrade(&mut self, txn: TransactionId, key: &Key) -> CoreResult<LockOutcome> {
        match self.registered_lock(txn, key)? {
            Some(LockType::Read) => {}
            Some(LockType::Write) => return Ok(LockOutcome::Granted),
            None => {
                return Err(CoreError::invariant(format!(
                    "{txn} asked to upgrade {key} without holding READ"
                )))
            }
        }

        let holders = match self.keys.get_mut(key) {
            Some(holders) if !holders.is_empty() => holders,
            _ => {
                return Err(CoreError::invariant(format!(
                    "{txn} holds READ on {key} but the key has no recorded readers"
                )))
            }
        };
        if !holders.iter().any(|&(holder, _)| holder == txn) {
            return Err(CoreError::invariant(format!(
                "{txn} holds READ on {key} but is missing from its holders"
            )));
        }
        if holders.len() > 1 {
            return Ok(LockOutcome::Conflict {
                holders: holders
                    .iter()
                    .map(|&(holder, _)| holder)
                    .filter(|&holder| holder != txn)
                    .collect(),
            });
        }
        holders[0].1 = LockType::Write;
        self.record(txn, key, LockType::Write);
        Ok(LockOutcome::Granted)
    }

    /// Releases every lock held by `txn` and unregisters it.
    ///
    /// Idempotent: a second call finds nothing and returns 0.
    pub fn release_all(&mut self, txn: TransactionId) -> usize {
        let Some(locks) = self.owned.remove(&txn) else {
            return 0;
        };
        for key in locks.keys() {
            if let Some(holders) = self.keys.get_mut(key) {
                holders.retain(|&(holder, _)| holder != txn);
                if holders.is_empty() {
                    self.keys.remove(key);
                }
            }
        }
        locks.len()
    }

    /// Returns the total number of (transaction, key) locks held.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.owned.values().map(HashMap::len).sum()
    }

    /// Returns the number of keys with at least one holder.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.values().filter(|holders| !holders.is_empty()).count()
    }

    /// Returns the number of registered transactions.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.owned.len()
    }

    /// Verifies the table invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` describing the first broken invariant.
    pub fn check_invariants(&self) -> CoreResult<()> {
        for (key, holders) in &self.keys {
            let writers = holders
                .iter()
                .filter(|&&(_, lock)| lock == LockType::Write)
                .count();
            if writers > 0 && holders.len() != 1 {
                return Err(CoreError::invariant(format!(
                    "{key} has a WRITE holder among {} holders",
                    holders.len()
                )));
            }
            for &(holder, lock) in holders {
                if self.held(holder, key) != Some(lock) {
                    return Err(CoreError::invariant(format!(
                        "{holder} listed on {key} as {lock} but its own map disagrees"
                    )));
                }
            }
        }
        for (txn, locks) in &self.owned {
            for (key, lock) in locks {
                if !self.holders(key).contains(&(*txn, *lock)) {
                    return Err(CoreError::invariant(format!(
                        "{txn} owns {lock} on {key} but is not listed as a holder"
                    )));
                }
            }
        }
        Ok(())
    }

    fn registered_lock(&self, txn: TransactionId, key: &Key) -> CoreResult<Option<LockType>> {
        match self.owned.get(&txn) {
            Some(locks) => Ok(locks.get(key).copied()),
            None => Err(CoreError::TransactionClosed { txn }),
        }
    }

    fn record(&mut self, txn: TransactionId, key: &Key, lock: LockType) {
        if let Some(locks) = self.owned.get_mut(&txn) {
            locks.insert(key.clone(), lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn table_with(txns: &[u64]) -> LockTable {
        let mut table = LockTable::new();
        for &id in txns {
            table.register(t(id)).unwrap();
        }
        table
    }

    #[test]
    fn unregistered_transaction_is_closed() {
        let mut table = LockTable::new();
        let err = table.try_read(t(1), &Key::from("k")).unwrap_err();
        assert!(matches!(err, CoreError::TransactionClosed { .. }));
    }

    #[test]
    fn duplicate_registration_is_a_collision() {
        let mut table = table_with(&[1]);
        assert!(matches!(
            table.register(t(1)),
            Err(CoreError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn readers_share() {
        let mut table = table_with(&[1, 2, 3]);
        let key = Key::from("k");
        for id in 1..=3 {
            assert!(table.try_read(t(id), &key).unwrap().is_granted());
        }
        assert_eq!(table.holders(&key).len(), 3);
        table.check_invariants().unwrap();
    }

    #[test]
    fn writer_excludes_everyone() {
        let mut table = table_with(&[1, 2]);
        let key = Key::from("k");
        assert!(table.try_write(t(1), &key).unwrap().is_granted());
        assert_eq!(
            table.try_write(t(2), &key).unwrap(),
            LockOutcome::Conflict { holders: vec![t(1)] }
        );
        assert_eq!(
            table.try_read(t(2), &key).unwrap(),
            LockOutcome::Conflict { holders: vec![t(1)] }
        );
        table.check_invariants().unwrap();
    }

    #[test]
    fn reentrant_requests_are_granted() {
        let mut table = table_with(&[1]);
        let key = Key::from("k");
        assert!(table.try_write(t(1), &key).unwrap().is_granted());
        assert!(table.try_write(t(1), &key).unwrap().is_granted());
        assert!(table.try_read(t(1), &key).unwrap().is_granted());
        assert_eq!(table.lock_count(), 1);
        assert_eq!(table.holders(&key), &[(t(1), LockType::Write)]);
    }

    #[test]
    fn sole_reader_upgrades_in_place() {
        let mut table = table_with(&[1]);
        let key = Key::from("k");
        table.try_read(t(1), &key).unwrap();
        assert!(table.try_write(t(1), &key).unwrap().is_granted());
        assert_eq!(table.held(t(1), &key), Some(LockType::Write));
        assert_eq!(table.holders(&key), &[(t(1), LockType::Write)]);
        table.check_invariants().unwrap();
    }

    #[test]
    fn upgrade_conflicts_with_other_readers() {
        let mut table = table_with(&[1, 2]);
        let key = Key::from("k");
        table.try_read(t(1), &key).unwrap();
        table.try_read(t(2), &key).unwrap();
        assert_eq!(
            table.try_write(t(1), &key).unwrap(),
            LockOutcome::Conflict { holders: vec![t(2)] }
        );
        assert_eq!(table.held(t(1), &key), Some(LockType::Read));

        table.release_all(t(2));
        assert!(table.try_write(t(1), &key).unwrap().is_granted());
    }

    #[test]
    fn upgrade_without_read_is_an_invariant_error() {
        let mut table = table_with(&[1]);
        assert!(matches!(
            table.try_upgrade(t(1), &Key::from("k")),
            Err(CoreError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn release_all_prunes_and_is_idempotent() {
        let mut table = table_with(&[1, 2]);
        let a = Key::from("a");
        let b = Key::from("b");
        table.try_write(t(1), &a).unwrap();
        table.try_read(t(1), &b).unwrap();
        table.try_read(t(2), &b).unwrap();

        assert_eq!(table.release_all(t(1)), 2);
        assert_eq!(table.release_all(t(1)), 0);
        assert!(table.holders(&a).is_empty());
        assert_eq!(table.holders(&b), &[(t(2), LockType::Read)]);
        assert_eq!(table.key_count(), 1);
        assert!(!table.is_registered(t(1)));
        table.check_invariants().unwrap();
    }

    #[test]
    fn released_transaction_cannot_reacquire() {
        let mut table = table_with(&[1]);
        table.release_all(t(1));
        assert!(matches!(
            table.try_write(t(1), &Key::from("k")),
            Err(CoreError::TransactionClosed { .. })
        ));
    }

    #[test]
    fn failed_attempts_leave_no_empty_entries_behind() {
        let mut table = table_with(&[1, 2]);
        let key = Key::from("k");
        table.try_write(t(1), &key).unwrap();
        table.try_read(t(2), &key).unwrap();
        table.release_all(t(1));
        // try_read by t(2) conflicted; the only holder is gone now
        assert_eq!(table.key_count(), 0);
        assert!(table.try_write(t(2), &key).unwrap().is_granted());
    }
}
