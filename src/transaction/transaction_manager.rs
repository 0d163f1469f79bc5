use crate::error::{ChalkError, ChalkResult};
use crate::transaction::{
    IsolationLevel, LockManager, Transaction, TransactionId, TransactionState, WriteOp,
};
use dashmap::DashMap;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out transaction ids and drives commit/abort. Abort replays the
/// write records in reverse, then releases every held lock.
#[derive(Debug)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    lock_manager: Arc<LockManager>,
    txns: DashMap<TransactionId, Arc<Transaction>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(1),
            lock_manager,
            txns: DashMap::new(),
        }
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.lock_manager.clone()
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.txns.insert(txn_id, txn.clone());
        self.lock_manager.register_txn(txn.clone());
        debug!("txn {txn_id} begins at {isolation_level:?}");
        txn
    }

    pub fn get_transaction(&self, txn_id: TransactionId) -> Option<Arc<Transaction>> {
        self.txns.get(&txn_id).map(|entry| entry.clone())
    }

    /// Strict 2PL: every lock is held to this point.
    pub fn commit(&self, txn: &Arc<Transaction>) -> ChalkResult<()> {
        self.release_all_locks(txn)?;
        txn.take_table_write_records();
        txn.take_index_write_records();
        txn.set_state(TransactionState::Committed);
        self.finish(txn);
        debug!("txn {} committed", txn.id());
        Ok(())
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> ChalkResult<()> {
        // Undo newest-first so later mutations of the same slot unwind
        // before earlier ones.
        let table_records = txn.take_table_write_records();
        for record in table_records.into_iter().rev() {
            match record.op {
                WriteOp::Insert => record.heap.mark_delete(record.rid)?,
                WriteOp::Delete => record.heap.rollback_delete(record.rid)?,
                WriteOp::Update => {
                    let old_tuple = record.old_tuple.as_ref().ok_or_else(|| {
                        ChalkError::Internal("Update write record lost its pre-image".to_string())
                    })?;
                    record.heap.update_tuple(record.rid, old_tuple)?;
                }
            }
        }

        let index_records = txn.take_index_write_records();
        for record in index_records.into_iter().rev() {
            match record.op {
                WriteOp::Insert => record.index.remove(&record.key)?,
                WriteOp::Delete => {
                    record.index.insert(&record.key, record.rid)?;
                }
                WriteOp::Update => {
                    record.index.remove(&record.key)?;
                    if let Some(old_key) = &record.old_key {
                        record.index.insert(old_key, record.rid)?;
                    }
                }
            }
        }

        self.release_all_locks(txn)?;
        txn.set_state(TransactionState::Aborted);
        self.finish(txn);
        debug!("txn {} aborted", txn.id());
        Ok(())
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) -> ChalkResult<()> {
        for rid in txn.exclusive_rids() {
            self.lock_manager.unlock(txn, rid)?;
        }
        for rid in txn.shared_rids() {
            self.lock_manager.unlock(txn, rid)?;
        }
        Ok(())
    }

    fn finish(&self, txn: &Arc<Transaction>) {
        self.txns.remove(&txn.id());
        self.lock_manager.deregister_txn(txn.id());
    }
}
