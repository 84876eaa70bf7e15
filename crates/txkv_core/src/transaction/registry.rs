//! Live transaction handles.

use super::state::TransactionCore;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
struct RegistryState {
    next: u64,
    live: HashMap<TransactionId, Arc<TransactionCore>>,
}

/// Allocates transaction handles and maps live handles to transactions.
///
/// Handles come from `1..=max_id` and wrap around, skipping `0` and any
/// handle still live. A handle is retired when its transaction commits or
/// rolls back.
#[derive(Debug)]
pub(crate) struct TransactionRegistry {
    max_id: u64,
    state: Mutex<RegistryState>,
}

impl TransactionRegistry {
    pub(crate) fn new(max_id: u64) -> Self {
        Self {
            max_id,
            state: Mutex::new(RegistryState {
                next: 1,
                live: HashMap::new(),
            }),
        }
    }

    /// Allocates a handle and registers the transaction `build` creates for it.
    ///
    /// `build` runs under the registry lock and must not call back into it.
    pub(crate) fn allocate<F>(&self, build: F) -> CoreResult<Arc<TransactionCore>>
    where
        F: FnOnce(TransactionId) -> CoreResult<Arc<TransactionCore>>,
    {
        let mut state = self.state.lock();
        if state.live.len() as u64 >= self.max_id {
            return Err(CoreError::invariant(format!(
                "transaction handle space exhausted ({} live)",
                state.live.len()
            )));
        }

        let id = loop {
            let candidate = TransactionId::new(state.next);
            state.next = if state.next >= self.max_id {
                1
            } else {
                state.next + 1
            };
            if !state.live.contains_key(&candidate) {
                break candidate;
            }
        };

        let core = build(id)?;
        state.live.insert(id, Arc::clone(&core));
        Ok(core)
    }

    /// Returns the live transaction with this handle.
    pub(crate) fn get(&self, id: TransactionId) -> CoreResult<Arc<TransactionCore>> {
        self.state
            .lock()
            .live
            .get(&id)
            .cloned()
            .ok_or(CoreError::UnknownTransaction { txn: id })
    }

    /// Forgets a finished transaction. Idempotent.
    pub(crate) fn retire(&self, id: TransactionId) {
        self.state.lock().live.remove(&id);
    }

    /// Returns live transactions whose deadline is at or before `now`.
    pub(crate) fn expired(&self, now: Instant) -> Vec<Arc<TransactionCore>> {
        // Transaction state is not inspected here: its mutex ranks above ours.
        self.state
            .lock()
            .live
            .values()
            .filter(|core| core.deadline().is_some_and(|deadline| deadline <= now))
            .cloned()
            .collect()
    }

    /// Returns every live transaction.
    pub(crate) fn all(&self) -> Vec<Arc<TransactionCore>> {
        self.state.lock().live.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().live.len()
    }
}
