//! In-memory storage backend for testing.

use crate::backend::{BackendTransaction, StorageBackend};
use crate::error::StorageResult;
use crate::write_set::{Change, WriteSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Store = Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Cloning the backend yields another handle to the same store.
///
/// # Example
///
/// ```rust
/// use txkv_storage::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// let mut txn = backend.begin().unwrap();
/// txn.put(b"greeting", b"hello").unwrap();
/// txn.commit().unwrap();
///
/// let txn = backend.begin().unwrap();
/// assert_eq!(txn.get(b"greeting").unwrap(), Some(b"hello".to_vec()));
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Store,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing entries.
    #[must_use]
    pub fn with_data<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        Self {
            data: Arc::new(RwLock::new(entries.into_iter().collect())),
        }
    }

    /// Returns a copy of all committed entries.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Vec<u8>, Vec<u8>> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn begin(&self) -> StorageResult<Box<dyn BackendTransaction>> {
        Ok(Box::new(MemoryTransaction {
            data: Arc::clone(&self.data),
            writes: WriteSet::new(),
        }))
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.data.read().len())
    }
}

struct MemoryTransaction {
    data: Store,
    writes: WriteSet,
}

impl BackendTransaction for MemoryTransaction {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.writes.lookup(key) {
            Some(Change::Put(value)) => Ok(Some(value.clone())),
            Some(Change::Remove) => Ok(None),
            None => Ok(self.data.read().get(key).cloned()),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.writes.put(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> StorageResult<bool> {
        let existed = self.contains(key)?;
        self.writes.remove(key);
        Ok(existed)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write();
        for (key, change) in self.writes.into_changes() {
            match change {
                Change::Put(value) => {
                    data.insert(key, value);
                }
                Change::Remove => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
