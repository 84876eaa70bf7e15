//! In-memory index of key expiration deadlines.
//!
//! Transactions stage TTL changes locally; the index is updated only when a
//! transaction commits, before its locks are released. The sweeper removes
//! due keys through ordinary transactions (see
//! [`crate::ConcurrencyEngine::sweep_expired`]).
//!
//! Deadlines are not persisted: after a restart keys no longer expire.

use crate::types::Key;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

#[derive(Debug, Default)]
struct ExpiryState {
    by_key: HashMap<Key, Instant>,
    by_deadline: BTreeSet<(Instant, Key)>,
}

impl ExpiryState {
    fn clear(&mut self, key: &Key) {
        if let Some(old) = self.by_key.remove(key) {
            self.by_deadline.remove(&(old, key.clone()));
        }
    }

    fn set(&mut self, key: Key, deadline: Instant) {
        self.clear(&key);
        self.by_deadline.insert((deadline, key.clone()));
        self.by_key.insert(key, deadline);
    }
}

/// Key -> deadline index, ordered by deadline.
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    state: Mutex<ExpiryState>,
}

impl ExpiryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies committed changes: `Some(deadline)` sets, `None` clears.
    pub fn apply<I>(&self, changes: I)
    where
        I: IntoIterator<Item = (Key, Option<Instant>)>,
    {
        let mut state = self.state.lock();
        for (key, deadline) in changes {
            match deadline {
                Some(deadline) => state.set(key, deadline),
                None => state.clear(&key),
            }
        }
    }

    /// Returns the deadline of `key`, if it has one.
    #[must_use]
    pub fn deadline(&self, key: &Key) -> Option<Instant> {
        self.state.lock().by_key.get(key).copied()
    }

    /// Returns the keys whose deadline is at or before `now`, oldest first.
    #[must_use]
    pub fn due(&self, now: Instant) -> Vec<(Key, Instant)> {
        self.state
            .lock()
            .by_deadline
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|(deadline, key)| (key.clone(), *deadline))
            .collect()
    }

    /// Returns the number of keys with a deadline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// Returns true if no key has a deadline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
