//! Shared helpers for the txkv benchmarks.

pub mod utils;
