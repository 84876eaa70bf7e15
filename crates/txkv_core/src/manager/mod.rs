//! Concurrency managers.
//!
//! One manager per engine, selected by [`ConcurrencyMode`]:
//!
//! | Mode  | Manager                  | Reads locked | On conflict |
//! |-------|--------------------------|--------------|-------------|
//! | NONE  | [`NoneManager`]          | no           | never       |
//! | OPTW  | [`OptimisticManager`]    | no           | fail        |
//! | OPTRW | [`OptimisticManager`]    | yes          | fail        |
//! | PESW  | [`PessimisticManager`]   | no           | wait        |
//! | PESRW | [`PessimisticManager`]   | yes          | wait        |
//!
//! Managers only decide who may touch which key. Data access goes through
//! the storage backend; the transaction wrapper sequences the two.

mod none;
mod optimistic;
mod pessimistic;

pub use none::NoneManager;
pub use optimistic::OptimisticManager;
pub use pessimistic::PessimisticManager;

use crate::config::ConcurrencyMode;
use crate::error::CoreResult;
use crate::stats::EngineCounters;
use crate::types::{Key, LockType, TransactionId};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// The transaction on whose behalf a lock is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    /// Transaction handle.
    pub id: TransactionId,
    /// Instant after which waiting for a lock fails with a timeout.
    pub deadline: Option<Instant>,
}

impl Requester {
    /// Creates a requester.
    #[must_use]
    pub const fn new(id: TransactionId, deadline: Option<Instant>) -> Self {
        Self { id, deadline }
    }

    /// Returns true if the deadline has passed.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// Locking policy applied to every transaction of an engine.
///
/// All methods are callable concurrently from any thread.
pub trait ConcurrencyManager: Send + Sync + fmt::Debug {
    /// The mode this manager implements.
    fn mode(&self) -> ConcurrencyMode;

    /// Registers a new transaction. Must precede any lock request for it.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the handle is already registered.
    fn register(&self, txn: TransactionId) -> CoreResult<()>;

    /// Acquires a READ lock on `key` (no-op in modes that do not track reads).
    ///
    /// # Errors
    ///
    /// Lock failures (`LockConflict`, `LockTimeout`, `Deadlock`) or
    /// `TransactionClosed` if the requester is no longer registered.
    fn read_lock(&self, requester: &Requester, key: &Key) -> CoreResult<()>;

    /// Acquires a WRITE lock on `key`, upgrading a READ lock the requester
    /// already holds.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyManager::read_lock`].
    fn write_lock(&self, requester: &Requester, key: &Key) -> CoreResult<()>;

    /// Acquires a WRITE lock only if it is free right now; never waits.
    ///
    /// # Errors
    ///
    /// Returns `LockConflict` if the key is held by anyone else.
    fn write_lock_now_or_fail(&self, requester: &Requester, key: &Key) -> CoreResult<()>;

    /// Releases every lock held by `txn` and unregisters it. Idempotent.
    ///
    /// Returns the number of locks released.
    fn release_all(&self, txn: TransactionId) -> usize;

    /// Fails any current or future lock wait of `txn` with a timeout.
    ///
    /// Used when a transaction is rolled back from another thread while it
    /// may be blocked.
    fn abort_waits(&self, _txn: TransactionId) {}

    /// Runs deadlock detection once. Returns the number of victims chosen.
    fn detect_deadlocks(&self) -> usize {
        0
    }

    /// Returns the lock `txn` holds on `key`, if any.
    fn held_lock(&self, txn: TransactionId, key: &Key) -> Option<LockType>;

    /// Returns the number of (transaction, key) locks currently held.
    fn held_lock_count(&self) -> usize;

    /// Returns the number of transactions blocked on a lock.
    fn waiting_count(&self) -> usize {
        0
    }
}

/// Builds the manager for `mode`.
#[must_use]
pub fn build_manager(
    mode: ConcurrencyMode,
    counters: Arc<EngineCounters>,
) -> Arc<dyn ConcurrencyManager> {
    match mode {
        ConcurrencyMode::None => Arc::new(NoneManager::new()),
        ConcurrencyMode::Optw | ConcurrencyMode::Optrw => {
            Arc::new(OptimisticManager::new(mode, counters))
        }
        ConcurrencyMode::Pesw | ConcurrencyMode::Pesrw => {
            Arc::new(PessimisticManager::new(mode, counters))
        }
    }
}

/// Describes conflicting holders for an error message.
pub(crate) fn describe_holders(holders: &[TransactionId]) -> String {
    let names: Vec<String> = holders.iter().map(ToString::to_string).collect();
    names.join(", ")
}
