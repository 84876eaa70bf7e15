//! Storage backend trait definitions.

use crate::error::StorageResult;

/// A physical key-value store that hands out byte-level transactions.
///
/// Backends are **opaque byte stores**. They know nothing about locks,
/// handles or isolation modes; the concurrency engine decides who may touch
/// a key and only then forwards the operation here.
///
/// # Invariants
///
/// - Writes made through a [`BackendTransaction`] are visible to that
///   transaction immediately and to everyone else only after `commit`
/// - `commit` is crash-atomic: after a crash the transaction's changes are
///   either fully applied or fully absent when the backend is reopened
/// - `rollback` discards every change of the transaction
/// - Backends must be `Send + Sync`; they synchronize internally
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and ephemeral stores
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Begins a new byte-level transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or cannot allocate
    /// transaction state.
    fn begin(&self) -> StorageResult<Box<dyn BackendTransaction>>;

    /// Returns the number of committed keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be determined.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if no keys are committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the count cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// A single byte-level transaction against a [`StorageBackend`].
///
/// `commit` and `rollback` consume the transaction, so a finished
/// transaction cannot be reused.
pub trait BackendTransaction: Send {
    /// Reads the value stored under `key`, including this transaction's
    /// own uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be staged.
    fn put(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Returns true if `key` currently has a value.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Removes `key`, returning true if it had a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be staged.
    fn remove(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Atomically applies every staged change.
    ///
    /// # Errors
    ///
    /// Returns an error if the changes could not be made durable. In that
    /// case none of them are visible.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every staged change.
    ///
    /// # Errors
    ///
    /// Returns an error if backend-side cleanup fails.
    fn rollback(self: Box<Self>) -> StorageResult<()>;
}
