//! Lock bookkeeping shared by the optimistic and pessimistic managers.
//!
//! The [`LockTable`] records who holds what; it never blocks. Policy (fail
//! fast or wait) lives in [`crate::manager`].

mod table;

pub use table::{LockOutcome, LockTable};
