//! Transaction state.

use super::registry::TransactionRegistry;
use crate::error::{CoreError, CoreResult};
use crate::expiry::ExpiryIndex;
use crate::manager::{ConcurrencyManager, Requester};
use crate::stats::EngineCounters;
use crate::types::{Key, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use txkv_storage::BackendTransaction;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

struct CoreInner {
    state: TransactionState,
    backend: Option<Box<dyn BackendTransaction>>,
    /// Staged expiry changes, applied to the index on commit.
    expiry_changes: HashMap<Key, Option<Instant>>,
}

impl CoreInner {
    fn ensure_active(&self, txn: TransactionId) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(CoreError::TransactionClosed { txn })
            }
        }
    }

    fn backend(&mut self, txn: TransactionId) -> CoreResult<&mut Box<dyn BackendTransaction>> {
        self.ensure_active(txn)?;
        self.backend.as_mut().ok_or_else(|| {
            CoreError::invariant(format!("{txn} is active but has no backend transaction"))
        })
    }
}

/// Shared state of one transaction.
///
/// Owned jointly by the handle registry and, for embedded use, a
/// [`Transaction`]. The inner mutex is never held while waiting for a lock,
/// so another thread (the reaper, engine close) can always roll it back.
///
/// Every data operation follows the same sequence: check the transaction is
/// active, ask the manager for the lock, then re-check and forward to the
/// backend under the inner mutex. A rollback that lands between the two
/// steps has already unregistered the transaction from the lock table, so
/// the lock request fails or the re-check does.
pub(crate) struct TransactionCore {
    id: TransactionId,
    deadline: Option<Instant>,
    manager: Arc<dyn ConcurrencyManager>,
    registry: Arc<TransactionRegistry>,
    expiry: Arc<ExpiryIndex>,
    counters: Arc<EngineCounters>,
    inner: Mutex<CoreInner>,
}

impl fmt::Debug for TransactionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCore")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .field("state", &self.inner.try_lock().map(|inner| inner.state))
            .finish_non_exhaustive()
    }
}

/// Everything a transaction needs from its engine.
#[derive(Debug, Clone)]
pub(crate) struct TransactionContext {
    pub(crate) manager: Arc<dyn ConcurrencyManager>,
    pub(crate) registry: Arc<TransactionRegistry>,
    pub(crate) expiry: Arc<ExpiryIndex>,
    pub(crate) counters: Arc<EngineCounters>,
}

impl TransactionCore {
    pub(crate) fn new(
        id: TransactionId,
        deadline: Option<Instant>,
        backend: Box<dyn BackendTransaction>,
        context: TransactionContext,
    ) -> Self {
        Self {
            id,
            deadline,
            manager: context.manager,
            registry: context.registry,
            expiry: context.expiry,
            counters: context.counters,
            inner: Mutex::new(CoreInner {
                state: TransactionState::Active,
                backend: Some(backend),
                expiry_changes: HashMap::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    fn requester(&self) -> Requester {
        Requester::new(self.id, self.deadline)
    }

    fn check(&self, key: &Key) -> CoreResult<()> {
        if key.is_system() {
            return Err(CoreError::ReservedKey { key: key.clone() });
        }
        self.inner.lock().ensure_active(self.id)
    }

    /// Rolls the transaction back if `result` reports a broken invariant.
    ///
    /// Lock and backend state can no longer be trusted at that point. The
    /// inner mutex must not be held by the caller.
    fn fatal<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(CoreError::InvariantViolation { .. }) = &result {
            if let Err(err) = self.abort() {
                tracing::warn!(txn = %self.id, error = %err, "rollback after invariant violation failed");
            }
        }
        result
    }

    pub(crate) fn get(&self, key: &Key) -> CoreResult<Option<Vec<u8>>> {
        self.fatal(self.get_inner(key))
    }

    fn get_inner(&self, key: &Key) -> CoreResult<Option<Vec<u8>>> {
        self.check(key)?;
        self.manager.read_lock(&self.requester(), key)?;
        let mut inner = self.inner.lock();
        Ok(inner.backend(self.id)?.get(key.as_bytes())?)
    }

    pub(crate) fn contains(&self, key: &Key) -> CoreResult<bool> {
        self.fatal(self.contains_inner(key))
    }

    fn contains_inner(&self, key: &Key) -> CoreResult<bool> {
        self.check(key)?;
        self.manager.read_lock(&self.requester(), key)?;
        let mut inner = self.inner.lock();
        Ok(inner.backend(self.id)?.contains(key.as_bytes())?)
    }

    pub(crate) fn put(&self, key: &Key, value: &[u8]) -> CoreResult<()> {
        self.fatal(self.write(key, value, None))
    }

    pub(crate) fn put_with_ttl(&self, key: &Key, value: &[u8], ttl: Duration) -> CoreResult<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CoreError::invalid_config(format!("ttl {ttl:?} is out of range")))?;
        self.fatal(self.write(key, value, Some(expires_at)))
    }

    fn write(&self, key: &Key, value: &[u8], expires_at: Option<Instant>) -> CoreResult<()> {
        self.check(key)?;
        self.manager.write_lock(&self.requester(), key)?;
        let mut inner = self.inner.lock();
        inner.backend(self.id)?.put(key.as_bytes(), value)?;
        inner.expiry_changes.insert(key.clone(), expires_at);
        Ok(())
    }

    pub(crate) fn remove(&self, key: &Key) -> CoreResult<bool> {
        let result = self
            .check(key)
            .and_then(|()| self.manager.write_lock(&self.requester(), key))
            .and_then(|()| self.remove_locked(key));
        self.fatal(result)
    }

    fn remove_locked(&self, key: &Key) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        let existed = inner.backend(self.id)?.remove(key.as_bytes())?;
        inner.expiry_changes.insert(key.clone(), None);
        Ok(existed)
    }

    pub(crate) fn lock(&self, key: &Key) -> CoreResult<()> {
        let result = self
            .check(key)
            .and_then(|()| self.manager.write_lock(&self.requester(), key))
            .and_then(|()| self.inner.lock().ensure_active(self.id));
        self.fatal(result)
    }

    pub(crate) fn write_lock_now_or_fail(&self, key: &Key) -> CoreResult<()> {
        let result = self
            .check(key)
            .and_then(|()| self.manager.write_lock_now_or_fail(&self.requester(), key))
            .and_then(|()| self.inner.lock().ensure_active(self.id));
        self.fatal(result)
    }

    /// Removes `key` if its expiry deadline is still `deadline`.
    ///
    /// Takes the WRITE lock without waiting. Returns `Ok(false)` if the key
    /// was re-written since, or had no value.
    pub(crate) fn remove_expired(&self, key: &Key, deadline: Instant) -> CoreResult<bool> {
        self.write_lock_now_or_fail(key)?;
        if self.expiry.deadline(key) != Some(deadline) {
            return Ok(false);
        }
        self.remove_locked(key)
    }

    /// Commits the backend transaction, then releases locks.
    ///
    /// If the backend commit fails the transaction ends up rolled back,
    /// unless the backend reports the commit durable, in which case it
    /// counts as committed. Either way its locks are released exactly once.
    pub(crate) fn commit(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active(self.id)?;
        let backend = inner.backend.take().ok_or_else(|| {
            CoreError::invariant(format!("{} is active but has no backend transaction", self.id))
        })?;

        let result = match backend.commit() {
            Err(err) if err.is_committed() => {
                tracing::warn!(txn = %self.id, error = %err, "commit durable, backend apply pending");
                Ok(())
            }
            other => other,
        };
        match result {
            Ok(()) => {
                inner.state = TransactionState::Committed;
                self.expiry.apply(inner.expiry_changes.drain());
                self.counters.record_commit();
            }
            Err(_) => {
                inner.state = TransactionState::RolledBack;
                inner.expiry_changes.clear();
                self.counters.record_rollback();
            }
        }
        self.finish();
        drop(inner);

        result.map_err(|err| {
            tracing::warn!(txn = %self.id, error = %err, "backend commit failed, transaction rolled back");
            err.into()
        })
    }

    /// Rolls back the backend transaction, then releases locks.
    pub(crate) fn rollback(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active(self.id)?;
        inner.state = TransactionState::RolledBack;
        inner.expiry_changes.clear();
        let result = match inner.backend.take() {
            Some(backend) => backend.rollback(),
            None => Ok(()),
        };
        self.counters.record_rollback();
        self.finish();
        drop(inner);
        result.map_err(CoreError::from)
    }

    /// Rolls back from another thread, failing any lock wait first so the
    /// rollback does not contend with a blocked owner.
    ///
    /// Returns `Ok(false)` if the transaction had already finished.
    pub(crate) fn abort(&self) -> CoreResult<bool> {
        self.manager.abort_waits(self.id);
        match self.rollback() {
            Ok(()) => Ok(true),
            Err(CoreError::TransactionClosed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn finish(&self) {
        self.manager.release_all(self.id);
        self.registry.retire(self.id);
    }
}

/// An embedded transaction.
///
/// Obtained from [`crate::ConcurrencyEngine::begin`]. Each operation first
/// takes the matching lock (READ for `get`/`contains`, WRITE for
/// `put`/`remove`/`lock`) and then runs against the backend transaction.
/// Dropping an active transaction rolls it back.
///
/// Lock failures leave the transaction active: the caller decides whether
/// to retry the operation or roll back.
#[derive(Debug)]
pub struct Transaction {
    core: Arc<TransactionCore>,
}

impl Transaction {
    pub(crate) fn new(core: Arc<TransactionCore>) -> Self {
        Self { core }
    }

    /// Returns the transaction handle.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.core.id()
    }

    /// Returns the instant after which lock waits fail, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.core.deadline()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.core.state()
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Reads a key.
    ///
    /// # Errors
    ///
    /// Lock failures, `TransactionClosed`, `ReservedKey` or storage errors.
    pub fn get(&self, key: impl Into<Key>) -> CoreResult<Option<Vec<u8>>> {
        self.core.get(&key.into())
    }

    /// Returns true if the key has a value.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::get`].
    pub fn contains(&self, key: impl Into<Key>) -> CoreResult<bool> {
        self.core.contains(&key.into())
    }

    /// Writes a key. Clears any expiry the key had once committed.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::get`].
    pub fn put(&self, key: impl Into<Key>, value: impl AsRef<[u8]>) -> CoreResult<()> {
        self.core.put(&key.into(), value.as_ref())
    }

    /// Writes a key that expires `ttl` from now.
    ///
    /// The expiry takes effect when the transaction commits.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::get`].
    pub fn put_with_ttl(
        &self,
        key: impl Into<Key>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> CoreResult<()> {
        self.core.put_with_ttl(&key.into(), value.as_ref(), ttl)
    }

    /// Removes a key, returning true if it had a value.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::get`].
    pub fn remove(&self, key: impl Into<Key>) -> CoreResult<bool> {
        self.core.remove(&key.into())
    }

    /// Takes a WRITE lock on a key without touching its value.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::get`].
    pub fn lock(&self, key: impl Into<Key>) -> CoreResult<()> {
        self.core.lock(&key.into())
    }

    /// Takes a WRITE lock only if it is free right now.
    ///
    /// # Errors
    ///
    /// Returns `LockConflict` if anyone else holds the key.
    pub fn write_lock_now_or_fail(&self, key: impl Into<Key>) -> CoreResult<()> {
        self.core.write_lock_now_or_fail(&key.into())
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if already finished, or the backend's commit
    /// error (the transaction is then rolled back).
    pub fn commit(self) -> CoreResult<()> {
        self.core.commit()
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// `TransactionClosed` if already finished, or a backend error.
    pub fn rollback(self) -> CoreResult<()> {
        self.core.rollback()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.core.is_active() {
            return;
        }
        match self.core.rollback() {
            Ok(()) | Err(CoreError::TransactionClosed { .. }) => {}
            Err(err) => {
                tracing::warn!(txn = %self.core.id(), error = %err, "rollback on drop failed");
            }
        }
    }
}
