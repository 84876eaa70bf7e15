//! Single-key commands.

use super::open_engine;
use std::path::Path;
use txkv_core::{ConcurrencyMode, TransactionId};

const AUTO: TransactionId = TransactionId::AUTOCOMMIT;

/// Runs the put command.
pub fn put(
    path: Option<&Path>,
    mode: ConcurrencyMode,
    key: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(path, mode)?;
    engine.put(AUTO, key, value)?;
    engine.close();
    println!("OK");
    Ok(())
}

/// Runs the get command.
pub fn get(
    path: Option<&Path>,
    mode: ConcurrencyMode,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(path, mode)?;
    let value = engine.get(AUTO, key)?;
    engine.close();
    match value {
        Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
        None => return Err(format!("key {key:?} not found").into()),
    }
    Ok(())
}

/// Runs the remove command.
pub fn remove(
    path: Option<&Path>,
    mode: ConcurrencyMode,
    key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(path, mode)?;
    let removed = engine.remove(AUTO, key)?;
    engine.close();
    println!("{}", if removed { "removed" } else { "not found" });
    Ok(())
}
