use super::{describe_holders, ConcurrencyManager, Requester};
use crate::config::ConcurrencyMode;
use crate::deadlock::WaitGraph;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockOutcome, LockTable};
use crate::stats::EngineCounters;
use crate::types::{Key, LockType, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
struct PessimisticState {
    table: LockTable,
    waits: WaitGraph,
    /// Chosen deadlock victims whose pending request has not failed yet.
    victims: HashSet<TransactionId>,
    /// Transactions whose waits must fail (rolled back from elsewhere).
    aborted: HashSet<TransactionId>,
}

impl PessimisticState {
    fn resolve_deadlocks(&mut self) -> usize {
        let chosen = self.waits.find_victims(&self.victims);
        for &victim in &chosen {
            if let Some(record) = self.waits.get(victim) {
                tracing::info!(
                    txn = %victim,
                    key = %record.key,
                    wanted = %record.wanted,
                    "deadlock detected, aborting newest waiter"
                );
            }
            self.victims.insert(victim);
        }
        chosen.len()
    }
}

/// Manager for PESW and PESRW: conflicts wait.
///
/// A blocked request sleeps on a condition variable until the lock becomes
/// compatible, its deadline passes, or it is chosen as a deadlock victim.
/// Every release wakes all waiters and each re-checks its own request, so
/// the first compatible waiter to run wins; there is no FIFO queue.
#[derive(Debug)]
pub struct PessimisticManager {
    mode: ConcurrencyMode,
    state: Mutex<PessimisticState>,
    released: Condvar,
    counters: Arc<EngineCounters>,
}

impl PessimisticManager {
    /// Creates a manager for `mode` (PESW or PESRW).
    #[must_use]
    pub fn new(mode: ConcurrencyMode, counters: Arc<EngineCounters>) -> Self {
        debug_assert!(mode.is_pessimistic());
        Self {
            mode,
            state: Mutex::new(PessimisticState::default()),
            released: Condvar::new(),
            counters,
        }
    }

    fn acquire(&self, requester: &Requester, key: &Key, wanted: LockType) -> CoreResult<()> {
        let txn = requester.id;
        let mut state = self.state.lock();
        let mut waiting = false;

        let result = loop {
            if state.aborted.contains(&txn) {
                self.counters.record_timeout();
                break Err(CoreError::LockTimeout {
                    txn,
                    key: key.clone(),
                });
            }
            if state.victims.remove(&txn) {
                self.counters.record_deadlock();
                break Err(CoreError::Deadlock {
                    txn,
                    key: key.clone(),
                });
            }

            let holders = match state.table.try_acquire(txn, key, wanted) {
                Ok(LockOutcome::Granted) => break Ok(()),
                Ok(LockOutcome::Conflict { holders }) => holders,
                Err(err) => break Err(err),
            };

            if requester.is_expired(Instant::now()) {
                self.counters.record_timeout();
                tracing::debug!(%txn, %key, "lock wait timed out");
                break Err(CoreError::LockTimeout {
                    txn,
                    key: key.clone(),
                });
            }

            let graph_changed = if waiting {
                state.waits.update_blockers(txn, holders)
            } else {
                tracing::debug!(
                    %txn,
                    %key,
                    %wanted,
                    blockers = %describe_holders(&holders),
                    "waiting for lock"
                );
                self.counters.record_wait();
                state.waits.begin_wait(txn, key, wanted, holders);
                waiting = true;
                true
            };
            if graph_changed && state.resolve_deadlocks() > 0 {
                self.released.notify_all();
                continue;
            }

            match requester.deadline {
                Some(deadline) => {
                    self.released.wait_until(&mut state, deadline);
                }
                None => self.released.wait(&mut state),
            }
        };

        if waiting {
            if let Some(record) = state.waits.end_wait(txn) {
                if result.is_ok() {
                    tracing::debug!(
                        %txn,
                        %key,
                        waited_ms = record.since.elapsed().as_millis() as u64,
                        "lock granted after wait"
                    );
                }
            }
        }
        result
    }
}

impl ConcurrencyManager for PessimisticManager {
    fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    fn register(&self, txn: TransactionId) -> CoreResult<()> {
        self.state.lock().table.register(txn)
    }

    fn read_lock(&self, requester: &Requester, key: &Key) -> CoreResult<()> {
        if !self.mode.tracks_reads() {
            return Ok(());
        }
        self.acquire(requester, key, LockType::Read)
    }

    fn write_lock(&self, requester: &Requester, key: &Key) -> CoreResult<()> {
        self.acquire(requester, key, LockType::Write)
    }

    fn write_lock_now_or_fail(&self, requester: &Requester, key: &Key) -> CoreResult<()> {
        let mut state = self.state.lock();
        match state.table.try_acquire(requester.id, key, LockType::Write)? {
            LockOutcome::Granted => Ok(()),
            LockOutcome::Conflict { holders } => {
                drop(state);
                self.counters.record_conflict();
                Err(CoreError::conflict(
                    requester.id,
                    key,
                    LockType::Write,
                    format!("held by {}, not waiting", describe_holders(&holders)),
                ))
            }
        }
    }

    fn release_all(&self, txn: TransactionId) -> usize {
        let mut state = self.state.lock();
        let released = state.table.release_all(txn);
        state.waits.end_wait(txn);
        state.victims.remove(&txn);
        state.aborted.remove(&txn);
        drop(state);
        if released > 0 {
            self.released.notify_all();
        }
        released
    }

    fn abort_waits(&self, txn: TransactionId) {
        let mut state = self.state.lock();
        if state.table.is_registered(txn) {
            state.aborted.insert(txn);
            drop(state);
            self.released.notify_all();
        }
    }

    fn detect_deadlocks(&self) -> usize {
        let mut state = self.state.lock();
        let victims = state.resolve_deadlocks();
        drop(state);
        if victims > 0 {
            self.released.notify_all();
        }
        victims
    }

    fn held_lock(&self, txn: TransactionId, key: &Key) -> Option<LockType> {
        self.state.lock().table.held(txn, key)
    }

    fn held_lock_count(&self) -> usize {
        self.state.lock().table.lock_count()
    }

    fn waiting_count(&self) -> usize {
        self.state.lock().waits.len()
    }
}
