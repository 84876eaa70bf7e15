//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, values, modes and operation
//! sequences.

use proptest::prelude::*;
use txkv_core::{ConcurrencyMode, CoreResult, Key, Transaction};

/// Strategy for generating keys from a small alphabet, so that generated
/// operations collide often.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop::string::string_regex("k[0-7]")
        .expect("Invalid regex")
        .prop_map(Key::from)
}

/// Strategy for generating arbitrary binary keys outside the reserved prefix.
pub fn binary_key_strategy() -> impl Strategy<Value = Key> {
    prop::collection::vec(any::<u8>(), 1..64)
        .prop_map(Key::from)
        .prop_filter("Key must not be reserved", |key| !key.is_system())
}

/// Strategy for generating values (arbitrary bytes).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for picking a concurrency mode.
pub fn mode_strategy() -> impl Strategy<Value = ConcurrencyMode> {
    prop::sample::select(ConcurrencyMode::ALL.to_vec())
}

/// A single operation inside a transaction.
#[derive(Debug, Clone)]
pub enum TxnOperation {
    /// Read a key
    Get {
        /// Key
        key: Key,
    },
    /// Check a key for a value
    Contains {
        /// Key
        key: Key,
    },
    /// Write a key
    Put {
        /// Key
        key: Key,
        /// Value
        value: Vec<u8>,
    },
    /// Remove a key
    Remove {
        /// Key
        key: Key,
    },
}

impl TxnOperation {
    /// Returns the key the operation touches.
    pub fn key(&self) -> &Key {
        match self {
            TxnOperation::Get { key }
            | TxnOperation::Contains { key }
            | TxnOperation::Put { key, .. }
            | TxnOperation::Remove { key } => key,
        }
    }

    /// Returns true for writes.
    pub fn is_write(&self) -> bool {
        matches!(self, TxnOperation::Put { .. } | TxnOperation::Remove { .. })
    }

    /// Applies the operation to a transaction.
    ///
    /// # Errors
    ///
    /// Whatever the transaction operation returns.
    pub fn apply(&self, txn: &Transaction) -> CoreResult<()> {
        match self {
            TxnOperation::Get { key } => txn.get(key.clone()).map(|_| ()),
            TxnOperation::Contains { key } => txn.contains(key.clone()).map(|_| ()),
            TxnOperation::Put { key, value } => txn.put(key.clone(), value),
            TxnOperation::Remove { key } => txn.remove(key.clone()).map(|_| ()),
        }
    }
}

/// Strategy for generating a single operation.
pub fn operation_strategy() -> impl Strategy<Value = TxnOperation> {
    prop_oneof![
        3 => key_strategy().prop_map(|key| TxnOperation::Get { key }),
        1 => key_strategy().prop_map(|key| TxnOperation::Contains { key }),
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| TxnOperation::Put { key, value }),
        1 => key_strategy().prop_map(|key| TxnOperation::Remove { key }),
    ]
}

/// Strategy for generating the operations of one transaction.
pub fn transaction_strategy(max_ops: usize) -> impl Strategy<Value = Vec<TxnOperation>> {
    prop::collection::vec(operation_strategy(), 1..=max_ops)
}
