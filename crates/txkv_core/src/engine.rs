//! Concurrency engine facade.

use crate::config::{ConcurrencyMode, EngineConfig};
use crate::deadlock::DeadlockDetector;
use crate::error::{CoreError, CoreResult};
use crate::expiry::ExpiryIndex;
use crate::manager::build_manager;
use crate::stats::{EngineCounters, EngineStats};
use crate::transaction::{Transaction, TransactionContext, TransactionCore, TransactionRegistry};
use crate::types::{Key, TransactionId};
use crate::worker::BackgroundWorker;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use txkv_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Keys removed.
    pub expired: usize,
    /// Due keys skipped because another transaction held them.
    pub skipped: usize,
}

/// The main engine handle.
///
/// `ConcurrencyEngine` owns the concurrency manager for its mode, the
/// handle registry, the expiry index and the background threads (deadlock
/// detector, reaper, expiry sweeper). There are no process-wide statics:
/// two engines are fully independent.
///
/// Cloning is cheap and shares the engine. Background threads stop when
/// the last clone is dropped or [`ConcurrencyEngine::close`] is called.
///
/// # Embedded use
///
/// ```rust,ignore
/// use txkv_core::{ConcurrencyEngine, ConcurrencyMode, EngineConfig};
///
/// let engine = ConcurrencyEngine::open_in_memory(
///     EngineConfig::default().mode(ConcurrencyMode::Optrw),
/// )?;
///
/// engine.transaction(|txn| {
///     let count = txn.get("counter")?.map_or(0, |v| v[0]);
///     txn.put("counter", [count + 1])?;
///     Ok(())
/// })?;
/// ```
///
/// # Handle use
///
/// ```rust,ignore
/// let h = engine.begin_handle(Some(Duration::from_secs(5)))?;
/// engine.put(h, "k1", b"v1")?;
/// engine.commit(h)?;
///
/// // Handle 0 runs each call in its own transaction.
/// let value = engine.get(TransactionId::AUTOCOMMIT, "k1")?;
/// ```
#[derive(Clone)]
pub struct ConcurrencyEngine {
    shared: Arc<EngineShared>,
    workers: Arc<Workers>,
}

struct EngineShared {
    config: EngineConfig,
    backend: Arc<dyn StorageBackend>,
    context: TransactionContext,
    is_open: RwLock<bool>,
}

#[derive(Default)]
struct WorkerSet {
    deadlock: Option<DeadlockDetector>,
    reaper: Option<BackgroundWorker>,
    sweeper: Option<BackgroundWorker>,
}

/// Background threads; dropped with the last engine clone.
struct Workers {
    shared: Arc<EngineShared>,
    set: Mutex<WorkerSet>,
}

impl Workers {
    fn stop(&self) {
        // Dropping each worker stops and joins its thread.
        let set = std::mem::take(&mut *self.set.lock());
        drop(set);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop();
        self.shared.close();
    }
}

impl ConcurrencyEngine {
    /// Opens an engine over a directory-backed [`FileBackend`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directory is
    /// locked by another process, or recovery fails.
    pub fn open(path: &Path, config: EngineConfig) -> CoreResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::open_with_backend(config, Arc::new(backend))
    }

    /// Opens an engine over a fresh [`InMemoryBackend`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn open_in_memory(config: EngineConfig) -> CoreResult<Self> {
        Self::open_with_backend(config, Arc::new(InMemoryBackend::new()))
    }

    /// Opens an engine over any storage backend.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad configuration, or an I/O error if a
    /// background thread cannot be spawned.
    pub fn open_with_backend(
        config: EngineConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        config.validate()?;

        let counters = Arc::new(EngineCounters::new());
        let context = TransactionContext {
            manager: build_manager(config.mode, Arc::clone(&counters)),
            registry: Arc::new(TransactionRegistry::new(config.max_transaction_id)),
            expiry: Arc::new(ExpiryIndex::new()),
            counters,
        };
        let shared = Arc::new(EngineShared {
            config,
            backend,
            context,
            is_open: RwLock::new(true),
        });
        let workers = Arc::new(Workers {
            shared: Arc::clone(&shared),
            set: Mutex::new(WorkerSet::default()),
        });
        *workers.set.lock() = shared.start_workers()?;

        tracing::info!(mode = %shared.config.mode, "concurrency engine opened");
        Ok(Self { shared, workers })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns the concurrency mode.
    #[must_use]
    pub fn mode(&self) -> ConcurrencyMode {
        self.shared.config.mode
    }

    /// Begins an embedded transaction.
    ///
    /// `timeout` bounds how long lock waits may block and when the reaper
    /// rolls the transaction back; `None` uses the configured default.
    ///
    /// # Errors
    ///
    /// `EngineClosed`, a backend error, or `InvariantViolation` if the
    /// handle space is exhausted.
    pub fn begin(&self, timeout: Option<Duration>) -> CoreResult<Transaction> {
        Ok(Transaction::new(self.shared.begin_core(timeout)?))
    }

    /// Begins a transaction addressed by handle.
    ///
    /// The transaction lives until [`ConcurrencyEngine::commit`] or
    /// [`ConcurrencyEngine::rollback`] is called with the handle, the reaper
    /// rolls it back, or the engine closes.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::begin`].
    pub fn begin_handle(&self, timeout: Option<Duration>) -> CoreResult<TransactionId> {
        Ok(self.shared.begin_core(timeout)?.id())
    }

    /// Reads a key. Handle `0` runs in its own transaction.
    ///
    /// # Errors
    ///
    /// `UnknownTransaction` for a handle that is not live, plus anything
    /// [`Transaction::get`] returns.
    pub fn get(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<Option<Vec<u8>>> {
        let key = key.into();
        self.shared.with_handle(handle, |core| core.get(&key))
    }

    /// Returns true if the key has a value.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::get`].
    pub fn contains(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<bool> {
        let key = key.into();
        self.shared.with_handle(handle, |core| core.contains(&key))
    }

    /// Writes a key.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::get`].
    pub fn put(
        &self,
        handle: TransactionId,
        key: impl Into<Key>,
        value: impl AsRef<[u8]>,
    ) -> CoreResult<()> {
        let key = key.into();
        self.shared
            .with_handle(handle, |core| core.put(&key, value.as_ref()))
    }

    /// Writes a key that expires `ttl` from now, once the writing
    /// transaction has committed.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::get`].
    pub fn put_with_ttl(
        &self,
        handle: TransactionId,
        key: impl Into<Key>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> CoreResult<()> {
        let key = key.into();
        self.shared
            .with_handle(handle, |core| core.put_with_ttl(&key, value.as_ref(), ttl))
    }

    /// Removes a key, returning true if it had a value.
    ///
    /// # Errors
    ///
    /// Same as [`ConcurrencyEngine::get`].
    pub fn remove(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<bool> {
        let key = key.into();
        self.shared.with_handle(handle, |core| core.remove(&key))
    }

    /// Takes a WRITE lock on a key without touching its value.
    ///
    /// Returns `Ok(false)` if the lock could not be obtained (conflict,
    /// timeout or deadlock); the transaction stays active.
    ///
    /// # Errors
    ///
    /// Errors other than lock failures, as for [`ConcurrencyEngine::get`].
    pub fn lock(&self, handle: TransactionId, key: impl Into<Key>) -> CoreResult<bool> {
        let key = key.into();
        match self.shared.with_handle(handle, |core| core.lock(&key)) {
            Ok(()) => Ok(true),
            Err(err) if err.is_lock_failure() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Commits a handle transaction. Handle `0` is a no-op.
    ///
    /// # Errors
    ///
    /// `EngineClosed`, `UnknownTransaction`, or a backend commit error (the
    /// transaction is then rolled back).
    pub fn commit(&self, handle: TransactionId) -> CoreResult<()> {
        self.shared.ensure_open()?;
        if handle.is_autocommit() {
            return Ok(());
        }
        self.shared.context.registry.get(handle)?.commit()
    }

    /// Rolls back a handle transaction. Handle `0` is a no-op.
    ///
    /// # Errors
    ///
    /// `EngineClosed`, `UnknownTransaction`, or a backend error.
    pub fn rollback(&self, handle: TransactionId) -> CoreResult<()> {
        self.shared.ensure_open()?;
        if handle.is_autocommit() {
            return Ok(());
        }
        self.shared.context.registry.get(handle)?.rollback()
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// The function's error, or any error from begin/commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        let txn = self.begin(None)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback after failed closure failed");
                }
                Err(err)
            }
        }
    }

    /// Rolls back every transaction whose deadline has passed.
    ///
    /// Returns the number rolled back. Runs periodically on the reaper
    /// thread when `reaper_interval` is non-zero.
    pub fn reap_expired(&self) -> usize {
        self.shared.reap_expired()
    }

    /// Deletes keys whose expiry has passed.
    ///
    /// Keys locked by other transactions are skipped and retried by the next
    /// sweep.
    ///
    /// # Errors
    ///
    /// `EngineClosed` or a backend error.
    pub fn sweep_expired(&self) -> CoreResult<SweepReport> {
        self.shared.sweep_expired()
    }

    /// Runs deadlock detection once. Returns the number of victims chosen.
    pub fn detect_deadlocks(&self) -> usize {
        self.shared.context.manager.detect_deadlocks()
    }

    /// Returns the number of live transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.context.registry.len()
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let context = &self.shared.context;
        EngineStats::collect(
            self.mode(),
            &context.counters,
            context.registry.len(),
            context.manager.held_lock_count(),
            context.manager.waiting_count(),
        )
    }

    /// Returns the number of committed keys in the backend.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn key_count(&self) -> CoreResult<usize> {
        Ok(self.shared.backend.len()?)
    }

    /// Closes the engine.
    ///
    /// Stops background threads and rolls back every live transaction.
    /// Later operations fail with `EngineClosed`. Idempotent.
    pub fn close(&self) {
        self.workers.stop();
        self.shared.close();
    }

    /// Checks if the engine is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.shared.is_open.read()
    }
}

impl fmt::Debug for ConcurrencyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyEngine")
            .field("mode", &self.mode())
            .field("is_open", &self.is_open())
            .field("active_transactions", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl EngineShared {
    fn start_workers(self: &Arc<Self>) -> CoreResult<WorkerSet> {
        let mut set = WorkerSet::default();
        if self.config.mode.is_pessimistic() {
            set.deadlock = Some(DeadlockDetector::start(
                Arc::clone(&self.context.manager),
                self.config.deadlock_check_interval,
            )?);
        }
        if !self.config.reaper_interval.is_zero() {
            let shared = Arc::clone(self);
            set.reaper = Some(BackgroundWorker::spawn(
                "txkv-reaper",
                self.config.reaper_interval,
                move || {
                    shared.reap_expired();
                },
            )?);
        }
        if !self.config.expiry_sweep_interval.is_zero() {
            let shared = Arc::clone(self);
            set.sweeper = Some(BackgroundWorker::spawn(
                "txkv-expiry",
                self.config.expiry_sweep_interval,
                move || match shared.sweep_expired() {
                    Ok(_) | Err(CoreError::EngineClosed) => {}
                    Err(err) => tracing::warn!(error = %err, "expiry sweep failed"),
                },
            )?);
        }
        Ok(set)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::EngineClosed)
        }
    }

    fn begin_core(&self, timeout: Option<Duration>) -> CoreResult<Arc<TransactionCore>> {
        self.ensure_open()?;
        let deadline = timeout
            .or(self.config.default_timeout)
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let backend = self.backend.begin()?;
        let context = self.context.clone();
        let core = self.context.registry.allocate(|id| {
            context.manager.register(id)?;
            Ok(Arc::new(TransactionCore::new(id, deadline, backend, context)))
        })?;
        self.context.counters.record_start();
        Ok(core)
    }

    fn with_handle<T, F>(&self, handle: TransactionId, op: F) -> CoreResult<T>
    where
        F: FnOnce(&TransactionCore) -> CoreResult<T>,
    {
        self.ensure_open()?;
        if !handle.is_autocommit() {
            let core = self.context.registry.get(handle)?;
            return op(&core);
        }

        let core = self.begin_core(None)?;
        match op(&core) {
            Ok(value) => {
                core.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = core.rollback() {
                    tracing::warn!(txn = %core.id(), error = %rollback_err, "autocommit rollback failed");
                }
                Err(err)
            }
        }
    }

    fn reap_expired(&self) -> usize {
        let mut reaped = 0;
        for core in self.context.registry.expired(Instant::now()) {
            match core.abort() {
                Ok(true) => {
                    reaped += 1;
                    self.context.counters.record_reaped();
                    tracing::warn!(txn = %core.id(), "transaction passed its deadline and was rolled back");
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(txn = %core.id(), error = %err, "failed to roll back expired transaction");
                }
            }
        }
        reaped
    }

    fn sweep_expired(&self) -> CoreResult<SweepReport> {
        self.ensure_open()?;
        let mut report = SweepReport::default();
        for (key, deadline) in self.context.expiry.due(Instant::now()) {
            let core = self.begin_core(None)?;
            match core.remove_expired(&key, deadline) {
                Ok(removed) => {
                    core.commit()?;
                    if removed {
                        report.expired += 1;
                    }
                }
                Err(err) if err.is_lock_failure() => {
                    tracing::debug!(%key, "expired key is locked, retrying on next sweep");
                    core.rollback()?;
                    report.skipped += 1;
                }
                Err(err) => {
                    if let Err(rollback_err) = core.rollback() {
                        tracing::warn!(error = %rollback_err, "sweeper rollback failed");
                    }
                    return Err(err);
                }
            }
        }
        self.context.counters.record_expired_keys(report.expired as u64);
        Ok(report)
    }

    fn close(&self) {
        {
            let mut is_open = self.is_open.write();
            if !*is_open {
                return;
            }
            *is_open = false;
        }

        let mut rolled_back = 0usize;
        for core in self.context.registry.all() {
            match core.abort() {
                Ok(true) => rolled_back += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(txn = %core.id(), error = %err, "rollback during close failed");
                }
            }
        }
        tracing::info!(rolled_back, "concurrency engine closed");
    }
}
