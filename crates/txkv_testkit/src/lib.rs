//! # txkv Testkit
//!
//! Test utilities for txkv.
//!
//! This crate provides:
//! - Test fixtures and engine helpers for every concurrency mode
//! - Property-based test generators using proptest
//! - A shadow-model harness for integration tests
//! - Contention stress workloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txkv_testkit::prelude::*;
//!
//! #[test]
//! fn works_in_every_mode() {
//!     for_each_mode(|engine| {
//!         engine.transaction(|txn| txn.put("k", b"v")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
