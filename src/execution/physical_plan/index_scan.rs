use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::storage::index::TreeIndexIterator;
use crate::storage::page::RecordId;
use crate::storage::tuple::Tuple;
use log::debug;
use parking_lot::Mutex;
use std::ops::Bound;

/// Ordered range scan through a B+ tree index; tuples are fetched back
/// through the table heap under shared locks.
#[derive(Debug)]
pub struct PhysicalIndexScan {
    pub index_name: String,
    pub table_name: String,
    pub table_schema: SchemaRef,
    start_bound: Bound<Tuple>,
    end_bound: Bound<Tuple>,
    iterator: Mutex<Option<TreeIndexIterator>>,
}

impl PhysicalIndexScan {
    pub fn new(
        index_name: impl Into<String>,
        table_name: impl Into<String>,
        table_schema: SchemaRef,
        start_bound: Bound<Tuple>,
        end_bound: Bound<Tuple>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            table_name: table_name.into(),
            table_schema,
            start_bound,
            end_bound,
            iterator: Mutex::new(None),
        }
    }
}

impl VolcanoExecutor for PhysicalIndexScan {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init index scan executor on {}", self.index_name);
        let index_info = context.catalog.index_by_name(&self.index_name)?;
        let iterator = TreeIndexIterator::new(
            index_info.index.clone(),
            (self.start_bound.clone(), self.end_bound.clone()),
        );
        *self.iterator.lock() = Some(iterator);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        let table_info = context.catalog.table_by_name(&self.table_name)?;
        loop {
            let rid = {
                let mut guard = self.iterator.lock();
                let iterator = guard.as_mut().ok_or_else(|| {
                    crate::error::ChalkError::Execution("Index scan not initialized".to_string())
                })?;
                iterator.next()?
            };
            let Some(rid) = rid else {
                return Ok(None);
            };

            context.lock_shared(rid)?;
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

impl std::fmt::Display for PhysicalIndexScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IndexScan({})", self.index_name)
    }
}
