//! # txkv Core
//!
//! Transactional concurrency control for a key-value store.
//!
//! This crate provides:
//! - A lock table with shared (READ) and exclusive (WRITE) per-key locks
//! - Five concurrency modes: NONE, OPTW, OPTRW, PESW, PESRW
//! - Wait-for graph deadlock detection for the pessimistic modes
//! - Transactions that lock first and then delegate to a storage backend
//! - Handle-based access with autocommit (handle `0`), sessions, a timeout
//!   reaper and key expiration
//!
//! Storage itself is provided by `txkv_storage`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod deadlock;
mod engine;
mod error;
mod expiry;
pub mod lock;
pub mod manager;
mod session;
mod stats;
mod transaction;
mod types;
mod worker;

pub use config::{ConcurrencyMode, EngineConfig};
pub use deadlock::{find_cycle, DeadlockDetector};
pub use engine::{ConcurrencyEngine, SweepReport};
pub use error::{CoreError, CoreResult};
pub use expiry::ExpiryIndex;
pub use lock::{LockOutcome, LockTable};
pub use manager::{ConcurrencyManager, Requester};
pub use session::Session;
pub use stats::{EngineCounters, EngineStats};
pub use transaction::{Transaction, TransactionState};
pub use types::{Key, LockType, TransactionId, SYSTEM_KEY_PREFIX};

// Re-export storage types for convenience
pub use txkv_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
