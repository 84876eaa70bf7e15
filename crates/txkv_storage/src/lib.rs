//! # txkv Storage
//!
//! Storage backend traits and implementations for txkv.
//!
//! This crate provides the lowest-level storage abstraction. Backends are
//! **opaque byte stores** that hand out byte-level transactions; they do not
//! know about locks, isolation modes or transaction handles.
//!
//! ## Design Principles
//!
//! - A backend transaction stages its own writes and sees them immediately
//! - `commit` is crash-atomic: all staged changes or none
//! - Backends must be `Send + Sync` and synchronize internally
//! - Concurrency control lives one layer up, in `txkv_core`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - Persistent, one file per key, redo-journaled commits
//!
//! ## Example
//!
//! ```rust
//! use txkv_storage::{InMemoryBackend, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! let mut txn = backend.begin().unwrap();
//! txn.put(b"hello", b"world").unwrap();
//! txn.commit().unwrap();
//! assert_eq!(backend.len().unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;
mod write_set;

pub use backend::{BackendTransaction, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
