use crate::config::LockConfig;
use crate::error::{AbortReason, ChalkError, ChalkResult};
use crate::storage::page::RecordId;
use crate::transaction::{Transaction, TransactionId, TransactionState};
use dashmap::DashMap;
use log::{trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TransactionId,
    mode: LockMode,
    granted: bool,
}

/// Per-record FIFO request queue. Waiters sleep on the queue's condvar while
/// holding the manager's global mutex and re-check their grant predicate and
/// their transaction's aborted state on every wake.
#[derive(Debug, Default)]
struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    condvar: Arc<Condvar>,
    /// Transaction with a pending shared -> exclusive upgrade, if any.
    upgrading: Option<TransactionId>,
    shared_count: usize,
    is_writing: bool,
}

type LockTable = HashMap<RecordId, LockRequestQueue>;

/// Record-level two-phase lock manager with shared/exclusive modes, upgrade,
/// and a background waits-for cycle detector that aborts the youngest
/// transaction on any cycle.
#[derive(Debug)]
pub struct LockManager {
    lock_table: Mutex<LockTable>,
    /// Registry the detector uses to reach victim state; maintained by the
    /// transaction manager.
    txns: DashMap<TransactionId, Arc<Transaction>>,
    enable_cycle_detection: Arc<AtomicBool>,
    detector: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            lock_table: Mutex::new(HashMap::new()),
            txns: DashMap::new(),
            enable_cycle_detection: Arc::new(AtomicBool::new(config.enable_cycle_detection)),
            detector: Mutex::new(None),
        });
        if config.enable_cycle_detection {
            let weak: Weak<LockManager> = Arc::downgrade(&manager);
            let enable = manager.enable_cycle_detection.clone();
            let interval = config.cycle_detection_interval;
            let handle = thread::Builder::new()
                .name("chalkdb-deadlock-detector".to_string())
                .spawn(move || {
                    while enable.load(Ordering::SeqCst) {
                        thread::sleep(interval);
                        match weak.upgrade() {
                            Some(manager) => manager.run_detection_round(),
                            None => break,
                        }
                    }
                })
                .expect("failed to spawn deadlock detector");
            *manager.detector.lock() = Some(handle);
        }
        manager
    }

    pub fn register_txn(&self, txn: Arc<Transaction>) {
        self.txns.insert(txn.id(), txn);
    }

    pub fn deregister_txn(&self, txn_id: TransactionId) {
        self.txns.remove(&txn_id);
    }

    /// Acquire a shared lock. `Ok(false)` means the wait was cancelled
    /// because the transaction was chosen as a deadlock victim.
    pub fn lock_shared(&self, txn: &Transaction, rid: RecordId) -> ChalkResult<bool> {
        if txn.isolation_level() == crate::transaction::IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(ChalkError::TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::LockSharedOnReadUncommitted,
            });
        }
        self.lock_prepare(txn)?;

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_default();
        if queue
            .requests
            .iter()
            .any(|r| r.txn_id == txn.id() && r.granted)
        {
            return Ok(true);
        }
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });
        let condvar = queue.condvar.clone();

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_waiting_request(&mut table, rid, txn.id());
                return Ok(false);
            }
            let queue = table
                .get_mut(&rid)
                .ok_or_else(|| ChalkError::Internal("Lock queue vanished".to_string()))?;
            if Self::shared_grantable(queue, txn.id()) {
                Self::grant(queue, txn.id());
                queue.shared_count += 1;
                txn.add_shared_lock(rid);
                trace!("txn {} granted S on {rid}", txn.id());
                return Ok(true);
            }
            trace!("txn {} waiting for S on {rid}", txn.id());
            condvar.wait(&mut table);
        }
    }

    /// Acquire an exclusive lock; same cancellation contract as
    /// [`LockManager::lock_shared`].
    pub fn lock_exclusive(&self, txn: &Transaction, rid: RecordId) -> ChalkResult<bool> {
        self.lock_prepare(txn)?;

        let mut table = self.lock_table.lock();
        let queue = table.entry(rid).or_default();
        if queue
            .requests
            .iter()
            .any(|r| r.txn_id == txn.id() && r.granted && r.mode == LockMode::Exclusive)
        {
            return Ok(true);
        }
        queue.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        let condvar = queue.condvar.clone();

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_waiting_request(&mut table, rid, txn.id());
                return Ok(false);
            }
            let queue = table
                .get_mut(&rid)
                .ok_or_else(|| ChalkError::Internal("Lock queue vanished".to_string()))?;
            if Self::exclusive_grantable(queue, txn.id()) {
                Self::grant(queue, txn.id());
                queue.is_writing = true;
                txn.add_exclusive_lock(rid);
                trace!("txn {} granted X on {rid}", txn.id());
                return Ok(true);
            }
            trace!("txn {} waiting for X on {rid}", txn.id());
            condvar.wait(&mut table);
        }
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be
    /// pending per queue; the upgrader is granted ahead of FIFO order as
    /// soon as it is the sole holder.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: RecordId) -> ChalkResult<bool> {
        self.lock_prepare(txn)?;

        let mut table = self.lock_table.lock();
        let queue = table.get_mut(&rid).ok_or_else(|| {
            txn.set_state(TransactionState::Aborted);
            ChalkError::TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            }
        })?;
        if queue.upgrading.is_some() {
            txn.set_state(TransactionState::Aborted);
            return Err(ChalkError::TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        }
        let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn.id() && r.granted && r.mode == LockMode::Shared)
        else {
            // Upgrading without holding S is a caller error.
            txn.set_state(TransactionState::Aborted);
            return Err(ChalkError::TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::UpgradeConflict,
            });
        };
        request.mode = LockMode::Exclusive;
        request.granted = false;
        queue.shared_count -= 1;
        queue.upgrading = Some(txn.id());
        txn.remove_shared_lock(rid);
        let condvar = queue.condvar.clone();

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_waiting_request(&mut table, rid, txn.id());
                if let Some(queue) = table.get_mut(&rid) {
                    if queue.upgrading == Some(txn.id()) {
                        queue.upgrading = None;
                    }
                }
                return Ok(false);
            }
            let queue = table
                .get_mut(&rid)
                .ok_or_else(|| ChalkError::Internal("Lock queue vanished".to_string()))?;
            if !queue.is_writing && queue.shared_count == 0 {
                Self::grant(queue, txn.id());
                queue.is_writing = true;
                queue.upgrading = None;
                txn.add_exclusive_lock(rid);
                trace!("txn {} upgraded to X on {rid}", txn.id());
                return Ok(true);
            }
            trace!("txn {} waiting for upgrade on {rid}", txn.id());
            condvar.wait(&mut table);
        }
    }

    /// Release a held lock. Transitions the transaction into SHRINKING,
    /// except for shared releases under READ COMMITTED.
    pub fn unlock(&self, txn: &Transaction, rid: RecordId) -> ChalkResult<bool> {
        let mut table = self.lock_table.lock();
        let Some(queue) = table.get_mut(&rid) else {
            return Ok(false);
        };
        let Some(pos) = queue
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            return Ok(false);
        };
        let mode = queue.requests[pos].mode;
        queue.requests.remove(pos);
        match mode {
            LockMode::Shared => {
                queue.shared_count -= 1;
                txn.remove_shared_lock(rid);
            }
            LockMode::Exclusive => {
                queue.is_writing = false;
                txn.remove_exclusive_lock(rid);
            }
        }

        let read_committed_share = mode == LockMode::Shared
            && txn.isolation_level() == crate::transaction::IsolationLevel::ReadCommitted;
        if !read_committed_share && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        queue.condvar.notify_all();
        if queue.requests.is_empty() {
            table.remove(&rid);
        }
        trace!("txn {} released {mode:?} on {rid}", txn.id());
        Ok(true)
    }

    fn lock_prepare(&self, txn: &Transaction) -> ChalkResult<()> {
        if txn.state() == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return Err(ChalkError::TransactionAbort {
                txn_id: txn.id(),
                reason: AbortReason::LockOnShrinking,
            });
        }
        Ok(())
    }

    /// Grantable iff nothing writes and no exclusive request waits ahead of
    /// this one in the queue.
    fn shared_grantable(queue: &LockRequestQueue, txn_id: TransactionId) -> bool {
        if queue.is_writing {
            return false;
        }
        for request in queue.requests.iter() {
            if request.txn_id == txn_id && !request.granted {
                break;
            }
            if !request.granted && request.mode == LockMode::Exclusive {
                return false;
            }
        }
        true
    }

    /// Grantable iff nothing is held and no other request precedes it.
    fn exclusive_grantable(queue: &LockRequestQueue, txn_id: TransactionId) -> bool {
        if queue.is_writing || queue.shared_count > 0 {
            return false;
        }
        queue
            .requests
            .front()
            .map(|r| r.txn_id == txn_id && !r.granted)
            .unwrap_or(false)
    }

    fn grant(queue: &mut LockRequestQueue, txn_id: TransactionId) {
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && !r.granted)
        {
            request.granted = true;
        }
    }

    fn remove_waiting_request(table: &mut MutexGuard<'_, LockTable>, rid: RecordId, txn_id: TransactionId) {
        if let Some(queue) = table.get_mut(&rid) {
            queue.requests.retain(|r| !(r.txn_id == txn_id && !r.granted));
            queue.condvar.notify_all();
            if queue.requests.is_empty() {
                table.remove(&rid);
            }
        }
    }

    /// One background detection round: build the waits-for graph, abort the
    /// youngest transaction of every cycle, wake the queues it blocked on.
    fn run_detection_round(&self) {
        let mut table = self.lock_table.lock();
        loop {
            let waits_for = Self::build_waits_for(&table);
            let Some(victim) = Self::find_cycle_victim(&waits_for) else {
                break;
            };
            warn!("deadlock detected, aborting youngest txn {victim}");
            if let Some(txn) = self.txns.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            // Drop the victim's pending requests; its granted locks are
            // released by the abort unwind.
            for queue in table.values_mut() {
                let before = queue.requests.len();
                queue
                    .requests
                    .retain(|r| !(r.txn_id == victim && !r.granted));
                if queue.upgrading == Some(victim) {
                    queue.upgrading = None;
                }
                if queue.requests.len() != before {
                    queue.condvar.notify_all();
                }
            }
            table.retain(|_, queue| !queue.requests.is_empty());
        }
    }

    /// Every not-yet-granted waiter owes an edge to every granted holder in
    /// its queue. `BTreeMap` keeps the DFS start order ascending.
    fn build_waits_for(table: &LockTable) -> BTreeMap<TransactionId, Vec<TransactionId>> {
        let mut waits_for: BTreeMap<TransactionId, Vec<TransactionId>> = BTreeMap::new();
        for queue in table.values() {
            for waiter in queue.requests.iter().filter(|r| !r.granted) {
                let edges = waits_for.entry(waiter.txn_id).or_default();
                for holder in queue.requests.iter().filter(|r| r.granted) {
                    if holder.txn_id != waiter.txn_id {
                        edges.push(holder.txn_id);
                    }
                }
            }
        }
        for edges in waits_for.values_mut() {
            edges.sort_unstable();
            edges.dedup();
        }
        waits_for
    }

    fn find_cycle_victim(
        waits_for: &BTreeMap<TransactionId, Vec<TransactionId>>,
    ) -> Option<TransactionId> {
        let mut safe: HashSet<TransactionId> = HashSet::new();
        for &start in waits_for.keys() {
            if safe.contains(&start) {
                continue;
            }
            let mut path: Vec<TransactionId> = Vec::new();
            let mut on_path: HashSet<TransactionId> = HashSet::new();
            if let Some(victim) = Self::dfs(start, waits_for, &mut path, &mut on_path, &mut safe) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        node: TransactionId,
        graph: &BTreeMap<TransactionId, Vec<TransactionId>>,
        path: &mut Vec<TransactionId>,
        on_path: &mut HashSet<TransactionId>,
        safe: &mut HashSet<TransactionId>,
    ) -> Option<TransactionId> {
        if safe.contains(&node) {
            return None;
        }
        path.push(node);
        on_path.insert(node);
        if let Some(edges) = graph.get(&node) {
            for &next in edges.iter() {
                if on_path.contains(&next) {
                    // Back edge: the cycle is the path suffix from `next`.
                    let pos = path.iter().position(|&t| t == next).unwrap();
                    return path[pos..].iter().copied().max();
                }
                if let Some(victim) = Self::dfs(next, graph, path, on_path, safe) {
                    return Some(victim);
                }
            }
        }
        path.pop();
        on_path.remove(&node);
        safe.insert(node);
        None
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            // The detector may be the thread dropping the last handle.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LockManager;
    use crate::config::LockConfig;
    use crate::error::ChalkError;
    use crate::storage::page::RecordId;
    use crate::transaction::{IsolationLevel, Transaction, TransactionState};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn quiet_manager() -> Arc<LockManager> {
        LockManager::new(LockConfig {
            enable_cycle_detection: false,
            ..LockConfig::default()
        })
    }

    fn new_txn(id: u64) -> Arc<Transaction> {
        Arc::new(Transaction::new(id, IsolationLevel::RepeatableRead))
    }

    #[test]
    fn shared_locks_are_compatible() {
        let manager = quiet_manager();
        let rid = RecordId::new(1, 1);
        let txn1 = new_txn(1);
        let txn2 = new_txn(2);

        assert!(manager.lock_shared(&txn1, rid).unwrap());
        assert!(manager.lock_shared(&txn2, rid).unwrap());
        assert!(txn1.is_shared_locked(rid));

        assert!(manager.unlock(&txn1, rid).unwrap());
        assert!(manager.unlock(&txn2, rid).unwrap());
        assert!(!txn1.is_shared_locked(rid));
    }

    #[test]
    fn exclusive_waits_for_shared_readers() {
        let manager = quiet_manager();
        let rid = RecordId::new(2, 0);
        let txn1 = new_txn(1);
        let txn2 = new_txn(2);
        let txn3 = new_txn(3);

        assert!(manager.lock_shared(&txn1, rid).unwrap());
        assert!(manager.lock_shared(&txn2, rid).unwrap());

        let acquired = Arc::new(AtomicBool::new(false));
        let acquired_clone = acquired.clone();
        let manager_clone = manager.clone();
        let txn3_clone = txn3.clone();
        let handle = thread::spawn(move || {
            let ok = manager_clone.lock_exclusive(&txn3_clone, rid).unwrap();
            acquired_clone.store(ok, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        assert!(manager.unlock(&txn1, rid).unwrap());
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        assert!(manager.unlock(&txn2, rid).unwrap());
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(txn3.is_exclusive_locked(rid));
    }

    #[test]
    fn shared_blocks_behind_waiting_exclusive() {
        let manager = quiet_manager();
        let rid = RecordId::new(3, 0);
        let txn1 = new_txn(1);
        let txn2 = new_txn(2);
        let txn3 = new_txn(3);

        assert!(manager.lock_shared(&txn1, rid).unwrap());

        let manager_x = manager.clone();
        let txn2_clone = txn2.clone();
        let x_handle = thread::spawn(move || manager_x.lock_exclusive(&txn2_clone, rid).unwrap());
        thread::sleep(Duration::from_millis(20));

        // A later shared request must not jump the queued writer.
        let s_acquired = Arc::new(AtomicBool::new(false));
        let s_acquired_clone = s_acquired.clone();
        let manager_s = manager.clone();
        let txn3_clone = txn3.clone();
        let s_handle = thread::spawn(move || {
            manager_s.lock_shared(&txn3_clone, rid).unwrap();
            s_acquired_clone.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!s_acquired.load(Ordering::SeqCst));

        manager.unlock(&txn1, rid).unwrap();
        x_handle.join().unwrap();
        manager.unlock(&txn2, rid).unwrap();
        s_handle.join().unwrap();
        assert!(s_acquired.load(Ordering::SeqCst));
        manager.unlock(&txn3, rid).unwrap();
    }

    #[test]
    fn upgrade_waits_for_other_readers() {
        let manager = quiet_manager();
        let rid = RecordId::new(4, 0);
        let txn1 = new_txn(1);
        let txn2 = new_txn(2);

        assert!(manager.lock_shared(&txn1, rid).unwrap());
        assert!(manager.lock_shared(&txn2, rid).unwrap());

        let upgraded = Arc::new(AtomicBool::new(false));
        let upgraded_clone = upgraded.clone();
        let manager_clone = manager.clone();
        let txn1_clone = txn1.clone();
        let handle = thread::spawn(move || {
            let ok = manager_clone.lock_upgrade(&txn1_clone, rid).unwrap();
            upgraded_clone.store(ok, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!upgraded.load(Ordering::SeqCst));

        assert!(manager.unlock(&txn2, rid).unwrap());
        handle.join().unwrap();
        assert!(upgraded.load(Ordering::SeqCst));
        assert!(txn1.is_exclusive_locked(rid));
        assert!(!txn1.is_shared_locked(rid));
    }

    #[test]
    fn upgrade_without_shared_lock_is_a_conflict() {
        let manager = quiet_manager();
        let rid = RecordId::new(5, 0);
        let txn1 = new_txn(1);
        let txn2 = new_txn(2);

        assert!(manager.lock_shared(&txn1, rid).unwrap());
        let result = manager.lock_upgrade(&txn2, rid);
        assert!(matches!(
            result,
            Err(ChalkError::TransactionAbort { txn_id: 2, .. })
        ));
        assert_eq!(txn2.state(), TransactionState::Aborted);
    }

    #[test]
    fn lock_on_shrinking_aborts() {
        let manager = quiet_manager();
        let rid1 = RecordId::new(6, 0);
        let rid2 = RecordId::new(6, 1);
        let txn = new_txn(1);

        assert!(manager.lock_shared(&txn, rid1).unwrap());
        assert!(manager.unlock(&txn, rid1).unwrap());
        assert_eq!(txn.state(), TransactionState::Shrinking);

        let result = manager.lock_shared(&txn, rid2);
        assert!(matches!(result, Err(ChalkError::TransactionAbort { .. })));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn read_committed_keeps_growing_after_share_release() {
        let manager = quiet_manager();
        let rid = RecordId::new(7, 0);
        let txn = Arc::new(Transaction::new(1, IsolationLevel::ReadCommitted));

        assert!(manager.lock_shared(&txn, rid).unwrap());
        assert!(manager.unlock(&txn, rid).unwrap());
        assert_eq!(txn.state(), TransactionState::Growing);
        assert!(manager.lock_shared(&txn, rid).unwrap());
        assert!(manager.unlock(&txn, rid).unwrap());
    }

    #[test]
    fn shared_on_read_uncommitted_aborts() {
        let manager = quiet_manager();
        let rid = RecordId::new(8, 0);
        let txn = Arc::new(Transaction::new(1, IsolationLevel::ReadUncommitted));

        let result = manager.lock_shared(&txn, rid);
        assert!(matches!(result, Err(ChalkError::TransactionAbort { .. })));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn deadlock_aborts_youngest_transaction() {
        let manager = LockManager::new(LockConfig {
            cycle_detection_interval: Duration::from_millis(10),
            enable_cycle_detection: true,
        });
        let rid1 = RecordId::new(9, 0);
        let rid2 = RecordId::new(9, 1);
        let txn1 = new_txn(1);
        let txn2 = new_txn(2);
        manager.register_txn(txn1.clone());
        manager.register_txn(txn2.clone());

        assert!(manager.lock_exclusive(&txn1, rid1).unwrap());
        assert!(manager.lock_exclusive(&txn2, rid2).unwrap());

        let manager_clone = manager.clone();
        let txn2_clone = txn2.clone();
        let t2_handle = thread::spawn(move || {
            // Blocks behind txn1, then gets picked as the youngest victim.
            let granted = manager_clone.lock_exclusive(&txn2_clone, rid1).unwrap();
            if !granted {
                // The caller unwinds the victim, releasing its locks.
                for rid in txn2_clone.exclusive_rids() {
                    manager_clone.unlock(&txn2_clone, rid).unwrap();
                }
            }
            granted
        });
        thread::sleep(Duration::from_millis(20));

        // Closing the cycle: txn1 -> rid2 blocks until the detector fires
        // and the victim's unwind frees rid2.
        let got_rid2 = manager.lock_exclusive(&txn1, rid2).unwrap();
        assert!(got_rid2);

        let t2_result = t2_handle.join().unwrap();
        assert!(!t2_result);
        assert_eq!(txn2.state(), TransactionState::Aborted);
        assert_eq!(txn1.state(), TransactionState::Growing);
    }
}
