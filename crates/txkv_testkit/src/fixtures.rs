//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines
//! in any concurrency mode.

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use txkv_core::{ConcurrencyEngine, ConcurrencyMode, EngineConfig};

/// Configuration with background reaper and sweeper disabled.
///
/// Tests drive `reap_expired` and `sweep_expired` explicitly so timing does
/// not depend on thread scheduling. The deadlock detector still runs in the
/// pessimistic modes.
pub fn test_config(mode: ConcurrencyMode) -> EngineConfig {
    EngineConfig::new()
        .mode(mode)
        .deadlock_check_interval(Duration::from_millis(20))
        .reaper_interval(Duration::ZERO)
        .expiry_sweep_interval(Duration::ZERO)
}

/// A test engine with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: ConcurrencyEngine,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an in-memory engine.
    pub fn memory(mode: ConcurrencyMode) -> Self {
        Self::memory_with(test_config(mode))
    }

    /// Creates an in-memory engine with a custom configuration.
    pub fn memory_with(config: EngineConfig) -> Self {
        Self {
            engine: ConcurrencyEngine::open_in_memory(config)
                .expect("Failed to open in-memory engine"),
            temp_dir: None,
        }
    }

    /// Creates a file-backed engine in a fresh temporary directory.
    pub fn file(mode: ConcurrencyMode) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let engine = ConcurrencyEngine::open(temp_dir.path(), test_config(mode))
            .expect("Failed to open file engine");
        Self {
            engine,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Closes the engine and reopens the same directory in `mode`.
    ///
    /// # Panics
    ///
    /// Panics for in-memory engines.
    pub fn reopen(self, mode: ConcurrencyMode) -> Self {
        let temp_dir = self.temp_dir.expect("Only file engines can be reopened");
        self.engine.close();
        drop(self.engine);
        let engine = ConcurrencyEngine::open(temp_dir.path(), test_config(mode))
            .expect("Failed to reopen file engine");
        Self {
            engine,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestEngine {
    type Target = ConcurrencyEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test with a temporary in-memory engine.
///
/// # Example
///
/// ```rust,ignore
/// use txkv_testkit::with_engine;
///
/// with_engine(ConcurrencyMode::Optrw, |engine| {
///     engine.put(TransactionId::AUTOCOMMIT, "k", b"v").unwrap();
/// });
/// ```
pub fn with_engine<F, R>(mode: ConcurrencyMode, f: F) -> R
where
    F: FnOnce(&ConcurrencyEngine) -> R,
{
    let test_engine = TestEngine::memory(mode);
    f(&test_engine.engine)
}

/// Runs a test once per concurrency mode, each with a fresh engine.
pub fn for_each_mode<F>(mut f: F)
where
    F: FnMut(&ConcurrencyEngine),
{
    for mode in ConcurrencyMode::ALL {
        with_engine(mode, &mut f);
    }
}

/// Modes that take locks (everything but NONE).
pub const LOCKING_MODES: [ConcurrencyMode; 4] = [
    ConcurrencyMode::Optw,
    ConcurrencyMode::Optrw,
    ConcurrencyMode::Pesw,
    ConcurrencyMode::Pesrw,
];

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use txkv_core::TransactionId;

    /// Creates an engine with `key_count` keys `key-0..key-N` holding their
    /// index as a little-endian u64.
    pub fn populated_engine(mode: ConcurrencyMode, key_count: usize) -> TestEngine {
        let test_engine = TestEngine::memory(mode);
        for i in 0..key_count {
            test_engine
                .put(
                    TransactionId::AUTOCOMMIT,
                    format!("key-{i}"),
                    (i as u64).to_le_bytes(),
                )
                .expect("Failed to put key");
        }
        test_engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txkv_core::TransactionId;

    #[test]
    fn memory_engine_works() {
        let test_engine = TestEngine::memory(ConcurrencyMode::Pesrw);
        assert!(test_engine.path().is_none());
        test_engine
            .put(TransactionId::AUTOCOMMIT, "k", b"v")
            .unwrap();
        assert_eq!(test_engine.key_count().unwrap(), 1);
    }

    #[test]
    fn file_engine_survives_reopen() {
        let test_engine = TestEngine::file(ConcurrencyMode::Pesw);
        assert!(test_engine.path().is_some());
        test_engine
            .put(TransactionId::AUTOCOMMIT, "k", b"v")
            .unwrap();

        let reopened = test_engine.reopen(ConcurrencyMode::Optrw);
        assert_eq!(
            reopened.get(TransactionId::AUTOCOMMIT, "k").unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[test]
    fn every_mode_is_visited() {
        let mut seen = Vec::new();
        for_each_mode(|engine| seen.push(engine.mode()));
        assert_eq!(seen, ConcurrencyMode::ALL.to_vec());
    }

    #[test]
    fn populated_engine_has_keys() {
        let test_engine = scenarios::populated_engine(ConcurrencyMode::Optw, 10);
        assert_eq!(test_engine.key_count().unwrap(), 10);
        assert_eq!(
            test_engine.get(TransactionId::AUTOCOMMIT, "key-3").unwrap(),
            Some(3u64.to_le_bytes().to_vec())
        );
    }
}
