//! Staged changes of an uncommitted backend transaction.

use std::collections::BTreeMap;

/// A single staged change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Store the value under the key.
    Put(Vec<u8>),
    /// Delete the key.
    Remove,
}

/// Ordered set of staged changes, last write per key wins.
#[derive(Debug, Default, Clone)]
pub(crate) struct WriteSet {
    changes: BTreeMap<Vec<u8>, Change>,
}

impl WriteSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) {
        self.changes.insert(key.to_vec(), Change::Put(value.to_vec()));
    }

    pub(crate) fn remove(&mut self, key: &[u8]) {
        self.changes.insert(key.to_vec(), Change::Remove);
    }

    /// Returns `Some` if the key was touched by this transaction.
    pub(crate) fn lookup(&self, key: &[u8]) -> Option<&Change> {
        self.changes.get(key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.changes.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Change)> {
        self.changes.iter()
    }

    pub(crate) fn into_changes(self) -> BTreeMap<Vec<u8>, Change> {
        self.changes
    }
}
