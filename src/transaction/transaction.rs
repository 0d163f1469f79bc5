use crate::storage::index::BPlusTreeIndex;
use crate::storage::page::RecordId;
use crate::storage::table_heap::TableHeap;
use crate::storage::tuple::Tuple;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;

pub type TransactionId = u64;
pub const INVALID_TRANSACTION_ID: TransactionId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Delete,
    Update,
}

/// Undo information for one heap mutation.
#[derive(Debug)]
pub struct TableWriteRecord {
    pub op: WriteOp,
    pub rid: RecordId,
    pub heap: Arc<TableHeap>,
    /// Pre-image, present for updates.
    pub old_tuple: Option<Tuple>,
}

/// Undo information for one index mutation. `key` is the key that was
/// written; updates also carry the replaced key.
#[derive(Debug)]
pub struct IndexWriteRecord {
    pub op: WriteOp,
    pub rid: RecordId,
    pub index: Arc<BPlusTreeIndex>,
    pub key: Tuple,
    pub old_key: Option<Tuple>,
}

/// Per-transaction record keeping, shared across executor threads and the
/// deadlock detector.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    shared_lock_set: Mutex<HashSet<RecordId>>,
    exclusive_lock_set: Mutex<HashSet<RecordId>>,
    table_write_set: Mutex<Vec<TableWriteRecord>>,
    index_write_set: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TransactionId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            table_write_set: Mutex::new(Vec::new()),
            index_write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    pub fn is_shared_locked(&self, rid: RecordId) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: RecordId) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub(crate) fn add_shared_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: RecordId) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: RecordId) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: RecordId) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    pub fn shared_rids(&self) -> Vec<RecordId> {
        self.shared_lock_set.lock().iter().copied().collect()
    }

    pub fn exclusive_rids(&self) -> Vec<RecordId> {
        self.exclusive_lock_set.lock().iter().copied().collect()
    }

    pub fn append_table_write_record(&self, record: TableWriteRecord) {
        self.table_write_set.lock().push(record);
    }

    pub fn append_index_write_record(&self, record: IndexWriteRecord) {
        self.index_write_set.lock().push(record);
    }

    pub fn table_write_record_count(&self) -> usize {
        self.table_write_set.lock().len()
    }

    pub fn index_write_record_count(&self) -> usize {
        self.index_write_set.lock().len()
    }

    pub(crate) fn take_table_write_records(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut *self.table_write_set.lock())
    }

    pub(crate) fn take_index_write_records(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut *self.index_write_set.lock())
    }
}
