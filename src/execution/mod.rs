pub mod physical_plan;

use crate::catalog::{Catalog, SchemaRef};
use crate::error::{AbortReason, ChalkError, ChalkResult};
use crate::expression::Expr;
use crate::storage::page::RecordId;
use crate::storage::tuple::Tuple;
use crate::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};
use std::sync::Arc;

/// Pull-based executor surface: `init` once, then `next` until `None`. Rows
/// that do not come from a table carry an invalid record id.
pub trait VolcanoExecutor {
    fn init(&self, _context: &mut ExecutionContext) -> ChalkResult<()> {
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>>;

    fn output_schema(&self) -> SchemaRef;
}

/// Shared state threaded through every executor: catalog access plus the
/// running transaction and its record-lock protocol.
pub struct ExecutionContext<'a> {
    pub catalog: &'a Catalog,
    pub txn_manager: &'a TransactionManager,
    pub txn: Arc<Transaction>,
    lock_manager: Arc<LockManager>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        catalog: &'a Catalog,
        txn_manager: &'a TransactionManager,
        txn: Arc<Transaction>,
    ) -> Self {
        let lock_manager = txn_manager.lock_manager();
        Self {
            catalog,
            txn_manager,
            txn,
            lock_manager,
        }
    }

    /// Shared lock for a scan. READ UNCOMMITTED reads without locks; a
    /// cancelled wait surfaces as a deadlock abort.
    pub fn lock_shared(&self, rid: RecordId) -> ChalkResult<()> {
        if self.txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(());
        }
        if self.txn.is_shared_locked(rid) || self.txn.is_exclusive_locked(rid) {
            return Ok(());
        }
        if self.lock_manager.lock_shared(&self.txn, rid)? {
            Ok(())
        } else {
            Err(ChalkError::TransactionAbort {
                txn_id: self.txn.id(),
                reason: AbortReason::Deadlock,
            })
        }
    }

    /// READ COMMITTED drops shared locks between reads; stricter levels keep
    /// them until commit.
    pub fn unlock_after_read(&self, rid: RecordId) -> ChalkResult<()> {
        if self.txn.isolation_level() == IsolationLevel::ReadCommitted
            && self.txn.is_shared_locked(rid)
        {
            self.lock_manager.unlock(&self.txn, rid)?;
        }
        Ok(())
    }

    /// Exclusive lock for DML, upgrading a held shared lock.
    pub fn lock_exclusive(&self, rid: RecordId) -> ChalkResult<()> {
        if self.txn.is_exclusive_locked(rid) {
            return Ok(());
        }
        let granted = if self.txn.is_shared_locked(rid) {
            self.lock_manager.lock_upgrade(&self.txn, rid)?
        } else {
            self.lock_manager.lock_exclusive(&self.txn, rid)?
        };
        if granted {
            Ok(())
        } else {
            Err(ChalkError::TransactionAbort {
                txn_id: self.txn.id(),
                reason: AbortReason::Deadlock,
            })
        }
    }

    pub fn evaluate_predicate(&self, expr: &Expr, tuple: &Tuple) -> ChalkResult<bool> {
        expr.evaluate_as_predicate(tuple)
    }
}
