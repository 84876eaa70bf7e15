//! Wait-for graph and deadlock detection.
//!
//! A pessimistic transaction that cannot get a lock registers a wait: the
//! key, the lock type and the transactions blocking it. Those waits form a
//! directed graph (waiter -> blocker). A cycle is a deadlock.
//!
//! ## Victim policy
//!
//! For each cycle, the transaction that started waiting most recently is
//! chosen. The victim's pending request fails with `Deadlock`; its locks stay held until the
//! caller rolls it back.
//!
//! Detection runs inline whenever a wait is registered or its blockers
//! change, and periodically through [`DeadlockDetector`] as a backstop.

use crate::error::CoreResult;
use crate::manager::ConcurrencyManager;
use crate::types::{Key, LockType, TransactionId};
use crate::worker::BackgroundWorker;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A blocked lock request.
#[derive(Debug, Clone)]
pub(crate) struct WaitRecord {
    pub(crate) key: Key,
    pub(crate) wanted: LockType,
    pub(crate) blockers: Vec<TransactionId>,
    /// Order in which waits started; larger is newer.
    pub(crate) seq: u64,
    pub(crate) since: Instant,
}

/// All current waits, keyed by waiting transaction.
#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    waits: HashMap<TransactionId, WaitRecord>,
    next_seq: u64,
}

impl WaitGraph {
    /// Records that `txn` started waiting.
    pub(crate) fn begin_wait(
        &mut self,
        txn: TransactionId,
        key: &Key,
        wanted: LockType,
        blockers: Vec<TransactionId>,
    ) {
        self.next_seq += 1;
        self.waits.insert(
            txn,
            WaitRecord {
                key: key.clone(),
                wanted,
                blockers,
                seq: self.next_seq,
                since: Instant::now(),
            },
        );
    }

    /// Replaces the blockers of a wait. Returns true if they changed.
    pub(crate) fn update_blockers(&mut self, txn: TransactionId, blockers: Vec<TransactionId>) -> bool {
        match self.waits.get_mut(&txn) {
            Some(record) if record.blockers != blockers => {
                record.blockers = blockers;
                true
            }
            _ => false,
        }
    }

    /// Removes the wait of `txn`, returning it.
    pub(crate) fn end_wait(&mut self, txn: TransactionId) -> Option<WaitRecord> {
        self.waits.remove(&txn)
    }

    pub(crate) fn get(&self, txn: TransactionId) -> Option<&WaitRecord> {
        self.waits.get(&txn)
    }

    pub(crate) fn len(&self) -> usize {
        self.waits.len()
    }

    /// Chooses one victim per cycle, ignoring transactions in `excluded`
    /// (victims already chosen but not yet woken).
    pub(crate) fn find_victims(&self, excluded: &HashSet<TransactionId>) -> Vec<TransactionId> {
        let mut edges: BTreeMap<TransactionId, Vec<TransactionId>> = self
            .waits
            .iter()
            .filter(|(txn, _)| !excluded.contains(txn))
            .map(|(&txn, record)| (txn, record.blockers.clone()))
            .collect();

        let mut victims = Vec::new();
        while let Some(cycle) = find_cycle(&edges) {
            let Some(victim) = cycle
                .iter()
                .copied()
                .max_by_key(|txn| self.waits.get(txn).map_or(0, |record| record.seq))
            else {
                break;
            };
            edges.remove(&victim);
            victims.push(victim);
        }
        victims
    }
}

/// Finds one cycle in a wait-for graph, returned in edge order.
///
/// Nodes are visited in ascending order, so the result is deterministic.
#[must_use]
pub fn find_cycle(edges: &BTreeMap<TransactionId, Vec<TransactionId>>) -> Option<Vec<TransactionId>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        OnPath,
        Done,
    }

    fn visit(
        node: TransactionId,
        edges: &BTreeMap<TransactionId, Vec<TransactionId>>,
        marks: &mut HashMap<TransactionId, Mark>,
        path: &mut Vec<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        marks.insert(node, Mark::OnPath);
        path.push(node);
        for &next in edges.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            match marks.get(&next) {
                Some(Mark::OnPath) => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = visit(next, edges, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for &node in edges.keys() {
        if marks.contains_key(&node) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, edges, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Background thread that periodically runs deadlock detection on a manager.
#[derive(Debug)]
pub struct DeadlockDetector {
    _worker: BackgroundWorker,
}

impl DeadlockDetector {
    /// Starts the detector thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn start(manager: Arc<dyn ConcurrencyManager>, interval: Duration) -> CoreResult<Self> {
        let worker = BackgroundWorker::spawn("txkv-deadlock", interval, move || {
            let victims = manager.detect_deadlocks();
            if victims > 0 {
                tracing::debug!(victims, "periodic deadlock scan resolved cycles");
            }
        })?;
        Ok(Self { _worker: worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn graph(edges: &[(u64, &[u64])]) -> BTreeMap<TransactionId, Vec<TransactionId>> {
        edges
            .iter()
            .map(|(from, to)| (t(*from), to.iter().map(|&id| t(id)).collect()))
            .collect()
    }

    #[test]
    fn no_cycle_in_chain() {
        assert_eq!(find_cycle(&graph(&[(1, &[2]), (2, &[3])])), None);
    }

    #[test]
    fn two_party_cycle() {
        let cycle = find_cycle(&graph(&[(1, &[2]), (2, &[1])])).unwrap();
        assert_eq!(cycle, vec![t(1), t(2)]);
    }

    #[test]
    fn cycle_behind_a_tail() {
        let cycle = find_cycle(&graph(&[(1, &[2]), (2, &[3]), (3, &[4]), (4, &[2])])).unwrap();
        assert_eq!(cycle, vec![t(2), t(3), t(4)]);
    }

    #[test]
    fn newest_waiter_is_the_victim() {
        let mut waits = WaitGraph::default();
        let key = Key::from("k");
        waits.begin_wait(t(1), &key, LockType::Write, vec![t(2)]);
        waits.begin_wait(t(2), &key, LockType::Write, vec![t(3)]);
        waits.begin_wait(t(3), &key, LockType::Write, vec![t(1)]);
        assert_eq!(waits.find_victims(&HashSet::new()), vec![t(3)]);
    }

    #[test]
    fn one_victim_per_independent_cycle() {
        let mut waits = WaitGraph::default();
        let key = Key::from("k");
        waits.begin_wait(t(1), &key, LockType::Write, vec![t(2)]);
        waits.begin_wait(t(2), &key, LockType::Write, vec![t(1)]);
        waits.begin_wait(t(5), &key, LockType::Write, vec![t(6)]);
        waits.begin_wait(t(6), &key, LockType::Write, vec![t(5)]);

        let mut victims = waits.find_victims(&HashSet::new());
        victims.sort();
        assert_eq!(victims, vec![t(2), t(6)]);
    }

    #[test]
    fn excluded_victims_break_their_cycles() {
        let mut waits = WaitGraph::default();
        let key = Key::from("k");
        waits.begin_wait(t(1), &key, LockType::Write, vec![t(2)]);
        waits.begin_wait(t(2), &key, LockType::Write, vec![t(1)]);
        let excluded: HashSet<_> = [t(2)].into_iter().collect();
        assert!(waits.find_victims(&excluded).is_empty());
    }

    #[test]
    fn update_blockers_reports_changes() {
        let mut waits = WaitGraph::default();
        let key = Key::from("k");
        waits.begin_wait(t(1), &key, LockType::Read, vec![t(2)]);
        assert!(!waits.update_blockers(t(1), vec![t(2)]));
        assert!(waits.update_blockers(t(1), vec![t(3)]));
        assert_eq!(waits.get(t(1)).unwrap().blockers, vec![t(3)]);
        assert!(waits.end_wait(t(1)).is_some());
        assert_eq!(waits.len(), 0);
    }
}
