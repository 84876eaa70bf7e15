//! Transactions: the lock-then-delegate wrapper around backend transactions.
//!
//! Every operation asks the engine's concurrency manager for a lock before
//! touching the backend. Commit and rollback finish the backend transaction
//! first and release locks afterwards, so writes stay isolated until they
//! are durable.

mod registry;
mod state;

pub(crate) use registry::TransactionRegistry;
pub(crate) use state::{TransactionContext, TransactionCore};
pub use state::{Transaction, TransactionState};
