use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::storage::page::RecordId;
use crate::storage::table_heap::TableIterator;
use crate::storage::tuple::Tuple;
use log::debug;
use parking_lot::Mutex;

/// Full heap scan, shared-locking each live row per the transaction's
/// isolation level.
#[derive(Debug)]
pub struct PhysicalSeqScan {
    pub table_name: String,
    pub table_schema: SchemaRef,
    iterator: Mutex<Option<TableIterator>>,
}

impl PhysicalSeqScan {
    pub fn new(table_name: impl Into<String>, table_schema: SchemaRef) -> Self {
        Self {
            table_name: table_name.into(),
            table_schema,
            iterator: Mutex::new(None),
        }
    }
}

impl VolcanoExecutor for PhysicalSeqScan {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init seq scan executor on {}", self.table_name);
        let table_info = context.catalog.table_by_name(&self.table_name)?;
        *self.iterator.lock() = Some(table_info.table.iter());
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        let table_info = context.catalog.table_by_name(&self.table_name)?;
        loop {
            let entry = {
                let mut guard = self.iterator.lock();
                let iterator = guard.as_mut().ok_or_else(|| {
                    crate::error::ChalkError::Execution("Seq scan not initialized".to_string())
                })?;
                iterator.next()?
            };
            let Some((rid, meta, _)) = entry else {
                return Ok(None);
            };
            if meta.is_deleted {
                continue;
            }

            context.lock_shared(rid)?;
            // Re-read under the lock; the unlocked iterator copy may be
            // stale.
            let (meta, tuple) = table_info.table.get_tuple(rid)?;
            if meta.is_deleted {
                context.unlock_after_read(rid)?;
                continue;
            }
            context.unlock_after_read(rid)?;
            return Ok(Some((tuple, rid)));
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.table_schema.clone()
    }
}

impl std::fmt::Display for PhysicalSeqScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SeqScan({})", self.table_name)
    }
}
