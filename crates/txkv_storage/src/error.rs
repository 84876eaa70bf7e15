//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record or commit journal is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the storage directory.
    #[error("storage locked: another process has exclusive access")]
    Locked,

    /// The commit reached its commit point but applying it failed.
    ///
    /// The commit is durable: its journal is kept and replayed before the
    /// next read or commit, and on reopen. Until that replay succeeds, reads
    /// and commits fail.
    #[error("commit is durable but not yet applied: {source}")]
    ApplyPending {
        /// Why applying the journal failed.
        #[source]
        source: Box<StorageError>,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true if the failed commit nevertheless took effect.
    pub fn is_committed(&self) -> bool {
        matches!(self, StorageError::ApplyPending { .. })
    }
}
