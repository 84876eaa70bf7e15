//! Core type definitions for txkv.

use bytes::Bytes;
use std::fmt;

/// Identifier (handle) of a transaction.
///
/// Handles are allocated from `1..=max_transaction_id`. Handle `0` is
/// reserved and means "no explicit transaction": operations issued with it
/// run in their own single-operation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The reserved autocommit handle.
    pub const AUTOCOMMIT: Self = Self(0);

    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the reserved autocommit handle.
    #[must_use]
    pub const fn is_autocommit(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Prefix reserved for internal keys. User operations reject it.
pub const SYSTEM_KEY_PREFIX: &[u8] = b"\0txkv:";

/// An immutable, opaque byte-string key.
///
/// Equality and hashing are by content. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Bytes);

impl Key {
    /// Creates a key from anything convertible to bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Creates a key by copying a byte slice.
    #[must_use]
    pub fn copy_from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Creates an internal key under [`SYSTEM_KEY_PREFIX`].
    #[must_use]
    pub fn system(suffix: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(SYSTEM_KEY_PREFIX.len() + suffix.len());
        raw.extend_from_slice(SYSTEM_KEY_PREFIX);
        raw.extend_from_slice(suffix);
        Self(Bytes::from(raw))
    }

    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if this is an internal key.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.starts_with(SYSTEM_KEY_PREFIX)
    }

    /// Returns the key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{s:?}"),
            _ => {
                f.write_str("0x")?;
                for b in self.0.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::copy_from(s.as_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from(bytes)
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

/// Kind of lock held on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    /// Shared; any number of readers may hold it together.
    Read,
    /// Exclusive; the holder is the only holder of the key.
    Write,
}

impl LockType {
    /// Returns true if holding `self` already satisfies a request for `wanted`.
    #[must_use]
    pub const fn covers(self, wanted: LockType) -> bool {
        matches!(
            (self, wanted),
            (LockType::Write, _) | (LockType::Read, LockType::Read)
        )
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::Read => f.write_str("READ"),
            LockType::Write => f.write_str("WRITE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
        assert!(TransactionId::AUTOCOMMIT.is_autocommit());
        assert!(!t1.is_autocommit());
    }

    #[test]
    fn key_equality_is_by_content() {
        let a = Key::from("user:1");
        let b = Key::from(b"user:1".to_vec());
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn system_keys_carry_prefix() {
        let k = Key::system(b"meta");
        assert!(k.is_system());
        assert!(!Key::from("meta").is_system());
    }

    #[test]
    fn key_display() {
        assert_eq!(Key::from("abc").to_string(), "\"abc\"");
        assert_eq!(Key::from(vec![0u8, 255]).to_string(), "0x00ff");
    }

    #[test]
    fn write_covers_read() {
        assert!(LockType::Write.covers(LockType::Read));
        assert!(LockType::Write.covers(LockType::Write));
        assert!(LockType::Read.covers(LockType::Read));
        assert!(!LockType::Read.covers(LockType::Write));
    }
}
