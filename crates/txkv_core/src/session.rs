//! Client sessions.

use crate::engine::ConcurrencyEngine;
use crate::error::{CoreError, CoreResult};
use crate::types::{Key, TransactionId};
use std::collections::BTreeSet;
use std::time::Duration;

/// One client connection's view of the engine.
///
/// A session remembers the handles it opened. Dropping the session rolls
/// back every one of them that is still live, so a disconnected client
/// never leaves locks behind.
#[derive(Debug)]
pub struct Session {
    engine: ConcurrencyEngine,
    handles: BTreeSet<TransactionId>,
}

impl Session {
    /// Opens a session on `engine`.
    #[must_use]
    pub fn new(engine: ConcurrencyEngine) -> Self {
        Self {
            engine,
            handles: BTreeSet::new(),
        }
    }

    /// Returns the engine this session talks to.
    #[must_use]
    pub fn engine(&self) -> &ConcurrencyEngine {
        &self.engine
    }

    /// Returns the handles opened by this session and not yet finished
    /// through it.
    pub fn handles(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.handles.iter().copied()
    }

    /// Begins a transaction owned by this session.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::begin_handle`].
    pub fn begin(&mut self, timeout: Option<Duration>) -> CoreResult<TransactionId> {
        let handle = self.engine.begin_handle(timeout)?;
        self.handles.insert(handle);
        Ok(handle)
    }

    /// Reads a key.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::get`].
    pub fn get(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<Option<Vec<u8>>> {
        self.engine.get(handle, key)
    }

    /// Returns true if the key has a value.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::contains`].
    pub fn contains(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<bool> {
        self.engine.contains(handle, key)
    }

    /// Writes a key.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::put`].
    pub fn put(
        &self,
        handle: TransactionId,
        key: impl Into<Key>,
        value: impl AsRef<[u8]>,
    ) -> CoreResult<()> {
        self.engine.put(handle, key, value)
    }

    /// Removes a key.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::remove`].
    pub fn remove(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<bool> {
        self.engine.remove(handle, key)
    }

    /// Takes a WRITE lock on a key.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::lock`].
    pub fn lock(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<bool> {
        self.engine.lock(handle, key)
    }

    /// Commits a transaction of this session.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::commit`].
    pub fn commit(&mut self, handle: TransactionId) -> CoreResult<()> {
        self.handles.remove(&handle);
        self.engine.commit(handle)
    }

    /// Rolls back a transaction of this session.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::rollback`].
    pub fn rollback(&mut self, handle: TransactionId) -> CoreResult<()> {
        self.handles.remove(&handle);
        self.engine.rollback(handle)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in std::mem::take(&mut self.handles) {
            match self.engine.rollback(handle) {
                Ok(()) => {
                    tracing::debug!(txn = %handle, "rolled back on session teardown");
                }
                Err(CoreError::UnknownTransaction { .. } | CoreError::EngineClosed) => {}
                Err(err) => {
                    tracing::warn!(txn = %handle, error = %err, "rollback on session teardown failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConcurrencyMode, EngineConfig};

    fn engine() -> ConcurrencyEngine {
        ConcurrencyEngine::open_in_memory(
            EngineConfig::new()
                .mode(ConcurrencyMode::Pesrw)
                .reaper_interval(Duration::ZERO)
                .expiry_sweep_interval(Duration::ZERO),
        )
        .unwrap()
    }

    #[test]
    fn teardown_rolls_back_open_handles() {
        let engine = engine();
        {
            let mut session = Session::new(engine.clone());
            let h = session.begin(None).unwrap();
            session.put(h, "k", b"v").unwrap();
            assert_eq!(session.handles().count(), 1);
        }
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.stats().held_locks, 0);
        assert_eq!(engine.get(TransactionId::AUTOCOMMIT, "k").unwrap(), None);
    }

    #[test]
    fn committed_handles_are_not_touched() {
        let engine = engine();
        {
            let mut session = Session::new(engine.clone());
            let h = session.begin(None).unwrap();
            session.put(h, "k", b"v").unwrap();
            session.commit(h).unwrap();
            assert_eq!(session.handles().count(), 0);
        }
        assert_eq!(
            engine.get(TransactionId::AUTOCOMMIT, "k").unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[test]
    fn handles_reaped_elsewhere_are_skipped() {
        let engine = engine();
        let mut session = Session::new(engine.clone());
        let h = session.begin(Some(Duration::ZERO)).unwrap();
        assert_eq!(engine.reap_expired(), 1);
        assert!(session.lock(h, "k").is_err());
        drop(session);
        assert_eq!(engine.active_count(), 0);
    }
}
