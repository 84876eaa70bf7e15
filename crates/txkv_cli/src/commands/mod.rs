//! CLI command implementations.

pub mod kv;
pub mod stress;

use std::path::Path;
use txkv_core::{ConcurrencyEngine, ConcurrencyMode, CoreResult, EngineConfig};

/// Opens a file engine at `path`, or an in-memory engine without one.
pub fn open_engine(path: Option<&Path>, mode: ConcurrencyMode) -> CoreResult<ConcurrencyEngine> {
    let config = EngineConfig::default().mode(mode);
    match path {
        Some(path) => ConcurrencyEngine::open(path, config),
        None => {
            tracing::info!("no --path given, using an in-memory store");
            ConcurrencyEngine::open_in_memory(config)
        }
    }
}
