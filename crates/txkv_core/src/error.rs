//! Error types for txkv core.

use crate::types::{Key, LockType, TransactionId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in txkv core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] txkv_storage::StorageError),

    /// I/O error outside the storage backend (e.g. spawning a worker).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An optimistic lock request conflicted with another holder.
    ///
    /// Raised immediately, never after waiting. Retry the transaction.
    #[error("{txn} cannot take {wanted} lock on {key}: {reason}")]
    LockConflict {
        /// The requesting transaction.
        txn: TransactionId,
        /// The contended key.
        key: Key,
        /// The requested lock kind.
        wanted: LockType,
        /// Why the request was refused.
        reason: String,
    },

    /// The transaction's deadline passed while it was waiting for a lock.
    #[error("{txn} timed out waiting for lock on {key}")]
    LockTimeout {
        /// The waiting transaction.
        txn: TransactionId,
        /// The key it was waiting for.
        key: Key,
    },

    /// The transaction was chosen as a deadlock victim.
    #[error("{txn} aborted to break a deadlock while waiting for {key}")]
    Deadlock {
        /// The victim transaction.
        txn: TransactionId,
        /// The key it was waiting for.
        key: Key,
    },

    /// The transaction was already committed or rolled back.
    #[error("{txn} is closed")]
    TransactionClosed {
        /// The closed transaction.
        txn: TransactionId,
    },

    /// No live transaction has this handle.
    #[error("unknown transaction {txn}")]
    UnknownTransaction {
        /// The handle that was looked up.
        txn: TransactionId,
    },

    /// The key uses the reserved internal prefix.
    #[error("key {key} is reserved for internal use")]
    ReservedKey {
        /// The rejected key.
        key: Key,
    },

    /// An internal consistency check failed.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The engine has been closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl CoreError {
    /// Creates a lock conflict error.
    pub fn conflict(
        txn: TransactionId,
        key: &Key,
        wanted: LockType,
        reason: impl Into<String>,
    ) -> Self {
        Self::LockConflict {
            txn,
            key: key.clone(),
            wanted,
            reason: reason.into(),
        }
    }

    /// Creates an invariant violation error and logs it.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "invariant violation");
        Self::InvariantViolation { message }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the failed operation may succeed when the
    /// transaction is retried.
    pub fn is_retryable(&self) -> bool {
        self.is_lock_failure()
    }

    /// Returns true for conflicts, lock timeouts and deadlock aborts.
    pub fn is_lock_failure(&self) -> bool {
        matches!(
            self,
            CoreError::LockConflict { .. }
                | CoreError::LockTimeout { .. }
                | CoreError::Deadlock { .. }
        )
    }
}
