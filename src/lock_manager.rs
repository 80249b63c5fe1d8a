//! Manages tuple locks for two-phase locking.
//!
//! Locks are held at RID grain in Shared or Exclusive mode. Each RID has a
//! FIFO request queue; a single manager mutex guards the lock table, and
//! waiters block on one condition variable tied to it, re-validating their
//! granted flag and the wait-for graph on every wakeup. Deadlocks are
//! detected by DFS over the wait-for graph and surface as an error on the
//! request that closed the cycle; the caller is expected to abort that
//! transaction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::errors::{Error, Result};
use crate::transaction::{Transaction, TransactionId};
use crate::Rid;

/// Lock compatibility: Shared/Shared is the only compatible pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TransactionId,
    mode: LockMode,
    granted: bool,
}

type LockTable = HashMap<Rid, VecDeque<LockRequest>>;
type WaitsFor = HashMap<TransactionId, HashSet<TransactionId>>;

/// The lock manager.
#[derive(Debug, Default)]
pub struct LockManager {
    lock_table: Mutex<LockTable>,
    cvar: Condvar,
    /// waits_for[a] contains b when transaction a is waiting for a lock
    /// held by transaction b.
    waits_for: Mutex<WaitsFor>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        self.lock(txn, rid, LockMode::Shared)
    }

    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        self.lock(txn, rid, LockMode::Exclusive)
    }

    fn lock(&self, txn: &Transaction, rid: Rid, mode: LockMode) -> Result<()> {
        if !txn.is_active() {
            return Err(Error::TransactionNotActive);
        }
        let txn_id = txn.id();
        let mut lock_table = self.lock_table.lock().unwrap();

        // Grant immediately when compatible with the current holders.
        if Self::compatible_with_granted(lock_table.get(&rid), mode) {
            lock_table.entry(rid).or_default().push_back(LockRequest {
                txn_id,
                mode,
                granted: true,
            });
            return Ok(());
        }

        // Queue behind the holders and wait.
        lock_table.entry(rid).or_default().push_back(LockRequest {
            txn_id,
            mode,
            granted: false,
        });
        self.update_waits_for(rid, &lock_table);
        if self.has_deadlock(txn_id) {
            self.fail_request(&mut lock_table, rid, txn_id);
            return Err(Error::Deadlock);
        }

        loop {
            lock_table = self.cvar.wait(lock_table).unwrap();
            if Self::is_granted(&lock_table, rid, txn_id) {
                self.waits_for.lock().unwrap().remove(&txn_id);
                return Ok(());
            }
            self.update_waits_for(rid, &lock_table);
            if self.has_deadlock(txn_id) {
                self.fail_request(&mut lock_table, rid, txn_id);
                return Err(Error::Deadlock);
            }
        }
    }

    /// Releases this transaction's granted locks on one RID and hands the
    /// queue to the next waiters in FIFO order.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) {
        let mut lock_table = self.lock_table.lock().unwrap();
        self.release(&mut lock_table, rid, txn.id());
        self.cvar.notify_all();
    }

    /// Releases every lock the transaction holds and scrubs it from the
    /// wait-for graph. Called at commit or abort.
    pub fn unlock_all(&self, txn: &Transaction) {
        let txn_id = txn.id();
        let mut lock_table = self.lock_table.lock().unwrap();
        let rids: Vec<Rid> = lock_table.keys().copied().collect();
        for rid in rids {
            self.release(&mut lock_table, rid, txn_id);
        }

        let mut waits_for = self.waits_for.lock().unwrap();
        waits_for.remove(&txn_id);
        for waiters in waits_for.values_mut() {
            waiters.remove(&txn_id);
        }
        drop(waits_for);
        self.cvar.notify_all();
    }

    fn release(&self, lock_table: &mut LockTable, rid: Rid, txn_id: TransactionId) {
        let Some(queue) = lock_table.get_mut(&rid) else {
            return;
        };
        let before = queue.len();
        queue.retain(|req| !(req.txn_id == txn_id && req.granted));
        if queue.is_empty() {
            lock_table.remove(&rid);
            return;
        }
        if queue.len() != before {
            Self::grant_pending(lock_table, rid);
            self.update_waits_for(rid, lock_table);
        }
    }

    /// Removes a pending request after a deadlock verdict and lets the
    /// queue make progress without it.
    fn fail_request(&self, lock_table: &mut LockTable, rid: Rid, txn_id: TransactionId) {
        if let Some(queue) = lock_table.get_mut(&rid) {
            queue.retain(|req| !(req.txn_id == txn_id && !req.granted));
            if queue.is_empty() {
                lock_table.remove(&rid);
            } else {
                Self::grant_pending(lock_table, rid);
                self.update_waits_for(rid, lock_table);
            }
        }
        self.waits_for.lock().unwrap().remove(&txn_id);
        self.cvar.notify_all();
    }

    fn compatible_with_granted(queue: Option<&VecDeque<LockRequest>>, mode: LockMode) -> bool {
        let Some(queue) = queue else {
            return true;
        };
        queue
            .iter()
            .filter(|req| req.granted)
            .all(|req| req.mode == LockMode::Shared && mode == LockMode::Shared)
    }

    fn is_granted(lock_table: &LockTable, rid: Rid, txn_id: TransactionId) -> bool {
        lock_table
            .get(&rid)
            .and_then(|queue| queue.iter().rev().find(|req| req.txn_id == txn_id))
            .is_some_and(|req| req.granted)
    }

    /// Walks the queue in order, granting every request compatible with
    /// the currently granted set. An exclusive grant ends the scan, and a
    /// blocked request at the head ends it too, which keeps grants FIFO
    /// and prevents writer starvation under shared-lock pressure.
    fn grant_pending(lock_table: &mut LockTable, rid: Rid) {
        let Some(queue) = lock_table.get_mut(&rid) else {
            return;
        };
        for i in 0..queue.len() {
            if queue[i].granted {
                continue;
            }
            let mode = queue[i].mode;
            let compatible = queue
                .iter()
                .filter(|req| req.granted)
                .all(|req| req.mode == LockMode::Shared && mode == LockMode::Shared);
            if !compatible {
                return;
            }
            queue[i].granted = true;
            if mode == LockMode::Exclusive {
                return;
            }
        }
    }

    /// Rebuilds the wait-for edges contributed by one RID's queue: every
    /// waiter waits for every currently granted holder. A transaction that
    /// holds a lock and queues an incompatible request on the same RID
    /// gains a self-edge, so attempted upgrades fail fast as deadlocks.
    fn update_waits_for(&self, rid: Rid, lock_table: &LockTable) {
        let Some(queue) = lock_table.get(&rid) else {
            return;
        };
        let mut waits_for = self.waits_for.lock().unwrap();

        let granted: HashSet<TransactionId> = queue
            .iter()
            .filter(|req| req.granted)
            .map(|req| req.txn_id)
            .collect();
        let involved: HashSet<TransactionId> = queue.iter().map(|req| req.txn_id).collect();

        for req in queue.iter().filter(|req| !req.granted) {
            let edges = waits_for.entry(req.txn_id).or_default();
            for txn_id in &involved {
                if !granted.contains(txn_id) {
                    edges.remove(txn_id);
                }
            }
            for txn_id in &granted {
                edges.insert(*txn_id);
            }
        }
    }

    fn has_deadlock(&self, start_txn_id: TransactionId) -> bool {
        let waits_for = self.waits_for.lock().unwrap();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        Self::dfs_detect(start_txn_id, &waits_for, &mut visited, &mut rec_stack)
    }

    /// DFS cycle detection. `visited` prevents re-walking converged DAG
    /// paths; only a node still on the recursion stack closes a cycle.
    fn dfs_detect(
        txn_id: TransactionId,
        waits_for: &WaitsFor,
        visited: &mut HashSet<TransactionId>,
        rec_stack: &mut HashSet<TransactionId>,
    ) -> bool {
        visited.insert(txn_id);
        rec_stack.insert(txn_id);

        if let Some(blocking) = waits_for.get(&txn_id) {
            for &next_txn_id in blocking {
                if rec_stack.contains(&next_txn_id) {
                    return true;
                }
                if !visited.contains(&next_txn_id)
                    && Self::dfs_detect(next_txn_id, waits_for, visited, rec_stack)
                {
                    return true;
                }
            }
        }

        rec_stack.remove(&txn_id);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionManager;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_locks_coexist() {
        let lm = LockManager::new();
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let t2 = tm.begin();
        let rid: Rid = (1, 0);

        lm.lock_shared(&t1, rid).unwrap();
        lm.lock_shared(&t2, rid).unwrap();
        lm.unlock(&t1, rid);
        lm.unlock(&t2, rid);
    }

    #[test]
    fn test_lock_requires_active_transaction() {
        let lm = LockManager::new();
        let tm = TransactionManager::new();
        let txn = tm.begin();
        tm.commit(&txn).unwrap();

        match lm.lock_exclusive(&txn, (1, 0)) {
            Err(Error::TransactionNotActive) => {}
            other => panic!("expected TransactionNotActive, got {other:?}"),
        }
    }

    #[test]
    fn test_exclusive_blocks_until_release() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let t2 = tm.begin();
        let rid: Rid = (3, 7);

        lm.lock_exclusive(&t1, rid).unwrap();

        let lm2 = lm.clone();
        let t2c = t2.clone();
        let handle = thread::spawn(move || lm2.lock_exclusive(&t2c, rid));

        // Give the second transaction time to queue up, then release.
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        lm.unlock(&t1, rid);

        handle.join().unwrap().unwrap();
        lm.unlock(&t2, rid);
    }

    #[test]
    fn test_two_transaction_deadlock_is_detected() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new();
        let t1 = tm.begin();
        let t2 = tm.begin();
        let rid1: Rid = (1, 0);
        let rid2: Rid = (2, 0);

        lm.lock_exclusive(&t1, rid1).unwrap();
        lm.lock_exclusive(&t2, rid2).unwrap();

        let lm1 = lm.clone();
        let t1c = t1.clone();
        let blocked = thread::spawn(move || lm1.lock_exclusive(&t1c, rid2));

        thread::sleep(Duration::from_millis(50));
        // T1 waits for T2; this request closes the cycle.
        match lm.lock_exclusive(&t2, rid1) {
            Err(Error::Deadlock) => {}
            other => panic!("expected Deadlock, got {other:?}"),
        }

        // The aborting side releases its holds; the survivor proceeds.
        lm.unlock_all(&t2);
        blocked.join().unwrap().unwrap();
        lm.unlock_all(&t1);
    }

    #[test]
    fn test_upgrade_attempt_fails_fast() {
        let lm = LockManager::new();
        let tm = TransactionManager::new();
        let txn = tm.begin();
        let rid: Rid = (9, 1);

        lm.lock_shared(&txn, rid).unwrap();
        match lm.lock_exclusive(&txn, rid) {
            Err(Error::Deadlock) => {}
            other => panic!("expected Deadlock, got {other:?}"),
        }
        lm.unlock_all(&txn);
    }
}
