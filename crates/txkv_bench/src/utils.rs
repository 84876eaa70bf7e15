//! Benchmark utilities.

use rand::Rng;
use txkv_core::{ConcurrencyEngine, ConcurrencyMode, EngineConfig, TransactionId};

/// Generate random value data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct key names.
pub fn generate_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("bench-{i:06}")).collect()
}

/// Opens an in-memory engine in `mode` with `count` keys already written.
///
/// # Panics
///
/// Panics if the engine cannot be opened or populated.
pub fn populated_engine(mode: ConcurrencyMode, count: usize, value_size: usize) -> ConcurrencyEngine {
    let engine = ConcurrencyEngine::open_in_memory(EngineConfig::default().mode(mode))
        .expect("open in-memory engine");
    let value = random_data(value_size);
    for key in generate_keys(count) {
        engine
            .put(TransactionId::AUTOCOMMIT, key, &value)
            .expect("populate engine");
    }
    engine
}
