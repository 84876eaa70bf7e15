use super::{ConcurrencyManager, Requester};
use crate::config::ConcurrencyMode;
use crate::error::CoreResult;
use crate::types::{Key, LockType, TransactionId};

/// Manager for [`ConcurrencyMode::None`]: grants everything, records nothing.
///
/// Concurrent transactions may interleave arbitrarily. Last commit wins.
#[derive(Debug, Default)]
pub struct NoneManager;

impl NoneManager {
    /// Creates the manager.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ConcurrencyManager for NoneManager {
    fn mode(&self) -> ConcurrencyMode {
        ConcurrencyMode::None
    }

    fn register(&self, _txn: TransactionId) -> CoreResult<()> {
        Ok(())
    }

    fn read_lock(&self, _requester: &Requester, _key: &Key) -> CoreResult<()> {
        Ok(())
    }

    fn write_lock(&self, _requester: &Requester, _key: &Key) -> CoreResult<()> {
        Ok(())
    }

    fn write_lock_now_or_fail(&self, _requester: &Requester, _key: &Key) -> CoreResult<()> {
        Ok(())
    }

    fn release_all(&self, _txn: TransactionId) -> usize {
        0
    }

    fn held_lock(&self, _txn: TransactionId, _key: &Key) -> Option<LockType> {
        None
    }

    fn held_lock_count(&self) -> usize {
        0
    }
}
