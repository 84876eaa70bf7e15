//! Redo journal for crash-atomic file commits.
//!
//! Journal layout:
//!
//! ```text
//! | magic "TXKJ" (4) | version (1) | count u32 LE |
//! | op (1) | key_len u32 | key | [value_len u32 | value] | ...
//! | SHA-256 of all preceding bytes (32) |
//! ```
//!
//! `op` is 1 for put (followed by the value) and 2 for remove.

use crate::error::{StorageError, StorageResult};
use crate::write_set::Change;
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"TXKJ";
const VERSION: u8 = 1;
const OP_PUT: u8 = 1;
const OP_REMOVE: u8 = 2;
const DIGEST_LEN: usize = 32;

/// Encodes changes into journal bytes.
pub(crate) fn encode<'a, I>(changes: I, count: usize) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a Vec<u8>, &'a Change)>,
{
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&(count as u32).to_le_bytes());

    for (key, change) in changes {
        match change {
            Change::Put(value) => {
                buf.push(OP_PUT);
                put_bytes(&mut buf, key);
                put_bytes(&mut buf, value);
            }
            Change::Remove => {
                buf.push(OP_REMOVE);
                put_bytes(&mut buf, key);
            }
        }
    }

    let digest = Sha256::digest(&buf);
    buf.extend_from_slice(&digest);
    buf
}

/// Decodes journal bytes, verifying the trailing checksum.
pub(crate) fn decode(bytes: &[u8]) -> StorageResult<Vec<(Vec<u8>, Change)>> {
    if bytes.len() < MAGIC.len() + 1 + 4 + DIGEST_LEN {
        return Err(StorageError::corrupted("journal too short"));
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if Sha256::digest(body).as_slice() != digest {
        return Err(StorageError::corrupted("journal checksum mismatch"));
    }
    if &body[..4] != MAGIC {
        return Err(StorageError::corrupted("bad journal magic"));
    }
    if body[4] != VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported journal version {}",
            body[4]
        )));
    }

    let mut reader = Reader { buf: body, pos: 5 };
    let count = reader.u32()? as usize;
    let mut changes = Vec::with_capacity(count);
    for _ in 0..count {
        let op = reader.u8()?;
        let key = reader.bytes()?;
        let change = match op {
            OP_PUT => Change::Put(reader.bytes()?),
            OP_REMOVE => Change::Remove,
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown journal op {other}"
                )))
            }
        };
        changes.push((key, change));
    }
    if reader.pos != body.len() {
        return Err(StorageError::corrupted("trailing bytes in journal"));
    }
    Ok(changes)
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> StorageResult<&[u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| StorageError::corrupted("journal truncated"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
