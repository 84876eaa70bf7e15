//! File-based storage backend for persistent storage.
//!
//! Directory layout:
//!
//! ```text
//! <root>/
//! ├─ LOCK                 # Advisory lock, one process at a time
//! ├─ JOURNAL              # Present only while a commit is being applied
//! └─ keys/
//!    └─ <sha256(key)>     # One record file per key
//! ```
//!
//! A commit first writes its redo journal to a temporary file, syncs it and
//! renames it to `JOURNAL`. That rename is the commit point. The changes are
//! then applied with write-temp-then-rename and the journal is removed. On
//! open, a leftover `JOURNAL` is replayed; leftover temporary files belong to
//! commits that never reached the commit point and are deleted.
//!
//! If applying fails after the commit point, the commit still stands. The
//! journal stays in place and the backend is marked pending: every later
//! read and commit replays the journal first and fails while it cannot.

use crate::backend::{BackendTransaction, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::journal;
use crate::write_set::{Change, WriteSet};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "JOURNAL";
const KEYS_DIR: &str = "keys";
const TEMP_SUFFIX: &str = ".tmp";
const RECORD_MAGIC: &[u8; 4] = b"TXKV";

/// A file-based storage backend.
///
/// Data survives process restarts, and every commit is crash-atomic through
/// a redo journal (see the module docs).
///
/// # Thread Safety
///
/// The backend is `Send + Sync`. Commits are serialized internally and
/// readers never observe a half-applied commit.
///
/// # Example
///
/// ```no_run
/// use txkv_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("data")).unwrap();
/// let mut txn = backend.begin().unwrap();
/// txn.put(b"key", b"persistent value").unwrap();
/// txn.commit().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    shared: Arc<FileShared>,
}

#[derive(Debug)]
struct FileShared {
    root: PathBuf,
    keys_dir: PathBuf,
    /// Readers take it shared; applying a commit takes it exclusively.
    gate: RwLock<()>,
    /// Serializes journal writes and replays.
    commit_lock: Mutex<()>,
    /// Set while `JOURNAL` holds a commit that is not fully applied.
    pending: AtomicBool,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a file backend rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the directory (`Locked`)
    /// - A committed journal is corrupted (`Corrupted`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        let keys_dir = path.join(KEYS_DIR);
        fs::create_dir_all(&keys_dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let shared = FileShared {
            root: path.to_path_buf(),
            keys_dir,
            gate: RwLock::new(()),
            commit_lock: Mutex::new(()),
            pending: AtomicBool::new(false),
            _lock_file: lock_file,
        };
        shared.remove_temp_files()?;
        if shared.replay_journal()? {
            info!("replayed interrupted commit");
        }

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Returns the root directory of the backend.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.root
    }
}

impl StorageBackend for FileBackend {
    fn begin(&self) -> StorageResult<Box<dyn BackendTransaction>> {
        Ok(Box::new(FileTransaction {
            shared: Arc::clone(&self.shared),
            writes: WriteSet::new(),
        }))
    }

    fn len(&self) -> StorageResult<usize> {
        let _gate = self.shared.read_gate()?;
        let mut count = 0;
        for entry in fs::read_dir(&self.shared.keys_dir)? {
            let name = entry?.file_name();
            if !name.to_string_lossy().ends_with(TEMP_SUFFIX) {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl FileShared {
    fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    fn record_path(&self, key: &[u8]) -> PathBuf {
        let digest = Sha256::digest(key);
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.keys_dir.join(name)
    }

    fn temp_path(dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{stem}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple()))
    }

    fn remove_temp_files(&self) -> StorageResult<()> {
        for dir in [&self.root, &self.keys_dir] {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                    debug!(path = %entry.path().display(), "removing stale temporary file");
                    fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }

    /// Applies and removes `JOURNAL` if present. Returns true if one existed.
    fn replay_journal(&self) -> StorageResult<bool> {
        let journal_path = self.journal_path();
        let bytes = match fs::read(&journal_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let changes = journal::decode(&bytes)?;
        debug!(changes = changes.len(), "applying journal");
        for (key, change) in &changes {
            self.apply_change(key, change)?;
        }
        fs::remove_file(&journal_path)?;
        sync_dir(&self.root)?;
        Ok(true)
    }

    /// Finishes a pending commit. Caller holds `commit_lock`.
    fn finish_pending(&self) -> StorageResult<()> {
        if !self.pending.load(Ordering::Acquire) {
            return Ok(());
        }
        let _gate = self.gate.write();
        self.replay_journal()?;
        self.pending.store(false, Ordering::Release);
        info!("pending commit applied");
        Ok(())
    }

    /// Takes the read gate once no commit is pending.
    fn read_gate(&self) -> StorageResult<RwLockReadGuard<'_, ()>> {
        loop {
            if self.pending.load(Ordering::Acquire) {
                let _commit = self.commit_lock.lock();
                self.finish_pending()?;
            }
            let gate = self.gate.read();
            if !self.pending.load(Ordering::Acquire) {
                return Ok(gate);
            }
        }
    }

    fn read_record(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let bytes = match fs::read(self.record_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let header = RECORD_MAGIC.len() + 4;
        if bytes.len() < header || &bytes[..4] != RECORD_MAGIC {
            return Err(StorageError::corrupted("bad record header"));
        }
        let key_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let stored_key = bytes
            .get(header..header + key_len)
            .ok_or_else(|| StorageError::corrupted("record truncated"))?;
        if stored_key != key {
            return Err(StorageError::corrupted("record key does not match its file"));
        }
        Ok(Some(bytes[header + key_len..].to_vec()))
    }

    fn apply_change(&self, key: &[u8], change: &Change) -> StorageResult<()> {
        let path = self.record_path(key);
        match change {
            Change::Put(value) => {
                let mut record = Vec::with_capacity(8 + key.len() + value.len());
                record.extend_from_slice(RECORD_MAGIC);
                record.extend_from_slice(&(key.len() as u32).to_le_bytes());
                record.extend_from_slice(key);
                record.extend_from_slice(value);
                write_atomically(&self.keys_dir, &path, &record)
            }
            Change::Remove => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    fn commit(&self, writes: WriteSet) -> StorageResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let _commit = self.commit_lock.lock();
        // A new journal must never replace one that is still pending.
        self.finish_pending()?;

        let bytes = journal::encode(writes.iter(), writes.len());
        let temp = write_temp(&self.root, JOURNAL_FILE, &bytes)?;
        fs::rename(&temp, self.journal_path())?;

        // Committed. Failures from here on leave the journal for replay.
        let _gate = self.gate.write();
        let applied = sync_dir(&self.root).and_then(|()| {
            for (key, change) in writes.iter() {
                self.apply_change(key, change)?;
            }
            fs::remove_file(self.journal_path())?;
            sync_dir(&self.root)
        });
        applied.map_err(|err| {
            self.pending.store(true, Ordering::Release);
            warn!(error = %err, "commit is durable but applying it failed, replay pending");
            StorageError::ApplyPending {
                source: Box::new(err),
            }
        })
    }
}

/// Writes `data` to a temp file in `dir`, syncs it, and renames it over `target`.
fn write_atomically(dir: &Path, target: &Path, data: &[u8]) -> StorageResult<()> {
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = write_temp(dir, &stem, data)?;
    fs::rename(&temp, target)?;
    sync_dir(dir)
}

/// Writes and syncs `data` to a fresh temp file in `dir`.
fn write_temp(dir: &Path, stem: &str, data: &[u8]) -> StorageResult<PathBuf> {
    let temp = FileShared::temp_path(dir, stem);
    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(temp)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

struct FileTransaction {
    shared: Arc<FileShared>,
    writes: WriteSet,
}

impl BackendTransaction for FileTransaction {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.writes.lookup(key) {
            Some(Change::Put(value)) => Ok(Some(value.clone())),
            Some(Change::Remove) => Ok(None),
            None => {
                let _gate = self.shared.read_gate()?;
                self.shared.read_record(key)
            }
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.writes.put(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> StorageResult<bool> {
        let existed = self.contains(key)?;
        self.writes.remove(key);
        Ok(existed)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let FileTransaction { shared, writes } = *self;
        shared.commit(writes)
    }

    fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit_put(backend: &FileBackend, key: &[u8], value: &[u8]) {
        let mut txn = backend.begin().unwrap();
        txn.put(key, value).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn file_commit_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            commit_put(&backend, b"alpha", b"one");
            commit_put(&backend, b"beta", b"two");
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        let txn = backend.begin().unwrap();
        assert_eq!(txn.get(b"alpha").unwrap(), Some(b"one".to_vec()));
        assert_eq!(txn.get(b"beta").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.len().unwrap(), 2);
    }

    #[test]
    fn file_rollback_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let mut txn = backend.begin().unwrap();
        txn.put(b"k", b"v").unwrap();
        txn.rollback().unwrap();
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn file_remove_deletes_record() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        commit_put(&backend, b"k", b"v");

        let mut txn = backend.begin().unwrap();
        assert!(txn.remove(b"k").unwrap());
        txn.commit().unwrap();

        let txn = backend.begin().unwrap();
        assert!(!txn.contains(b"k").unwrap());
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _backend = FileBackend::open(dir.path()).unwrap();
        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(StorageError::Locked)
        ));
    }

    #[test]
    fn file_replays_committed_journal() {
        let dir = TempDir::new().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            commit_put(&backend, b"gone", b"x");
        }

        // Simulate a crash after the commit point: the journal exists but
        // none of its changes were applied.
        let mut ws = WriteSet::new();
        ws.put(b"fresh", b"value");
        ws.remove(b"gone");
        let bytes = journal::encode(ws.iter(), ws.len());
        fs::write(dir.path().join(JOURNAL_FILE), bytes).unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        let txn = backend.begin().unwrap();
        assert_eq!(txn.get(b"fresh").unwrap(), Some(b"value".to_vec()));
        assert_eq!(txn.get(b"gone").unwrap(), None);
        assert!(!dir.path().join(JOURNAL_FILE).exists());
    }

    #[test]
    fn file_ignores_uncommitted_temp_journal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        let torn = dir.path().join(format!("{JOURNAL_FILE}.abc{TEMP_SUFFIX}"));
        fs::write(&torn, b"TXKJ partial").unwrap();

        let backend = FileBackend::open(dir.path()).unwrap();
        assert!(backend.is_empty().unwrap());
        assert!(!torn.exists());
    }

    #[test]
    fn file_corrupted_journal_fails_open() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join(JOURNAL_FILE), b"garbage that is long enough to check").unwrap();

        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(StorageError::Corrupted(_))
        ));
    }

    /// Makes applying a put of `key` fail by putting a directory where its
    /// record file goes.
    fn obstruct(backend: &FileBackend, key: &[u8]) -> PathBuf {
        let path = backend.shared.record_path(key);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn read(backend: &FileBackend, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        backend.begin()?.get(key)
    }

    #[test]
    fn failed_apply_keeps_the_commit() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let blocked = obstruct(&backend, b"b");

        let mut txn = backend.begin().unwrap();
        txn.put(b"a", b"A").unwrap();
        txn.put(b"b", b"B").unwrap();
        let err = txn.commit().unwrap_err();
        assert!(err.is_committed(), "got {err}");
        assert!(dir.path().join(JOURNAL_FILE).exists());

        // Nothing half-applied is readable, and no commit can overwrite the
        // pending journal.
        assert!(read(&backend, b"a").is_err());
        let mut next = backend.begin().unwrap();
        next.put(b"c", b"C").unwrap();
        let err = next.commit().unwrap_err();
        assert!(!err.is_committed(), "got {err}");

        fs::remove_dir(&blocked).unwrap();
        assert_eq!(read(&backend, b"a").unwrap(), Some(b"A".to_vec()));
        assert_eq!(read(&backend, b"b").unwrap(), Some(b"B".to_vec()));
        assert!(!dir.path().join(JOURNAL_FILE).exists());

        commit_put(&backend, b"c", b"C");
        drop(backend);

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(read(&backend, b"a").unwrap(), Some(b"A".to_vec()));
        assert_eq!(read(&backend, b"b").unwrap(), Some(b"B".to_vec()));
        assert_eq!(read(&backend, b"c").unwrap(), Some(b"C".to_vec()));
    }

    #[test]
    fn failed_apply_is_finished_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            let blocked = obstruct(&backend, b"b");
            let mut txn = backend.begin().unwrap();
            txn.put(b"a", b"A").unwrap();
            txn.put(b"b", b"B").unwrap();
            assert!(txn.commit().unwrap_err().is_committed());
            fs::remove_dir(&blocked).unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(read(&backend, b"a").unwrap(), Some(b"A".to_vec()));
        assert_eq!(read(&backend, b"b").unwrap(), Some(b"B".to_vec()));
        assert_eq!(backend.len().unwrap(), 2);
    }
}
