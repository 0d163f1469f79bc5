use crate::catalog::{SchemaRef, DELETE_OUTPUT_SCHEMA_REF};
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::storage::page::{RecordId, INVALID_RID};
use crate::storage::tuple::Tuple;
use crate::transaction::{IndexWriteRecord, TableWriteRecord, WriteOp};
use crate::utils::scalar::ScalarValue;
use log::debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::PhysicalPlan;

/// Mark-deletes matched rows under exclusive locks and removes their keys
/// from every secondary index.
#[derive(Debug)]
pub struct PhysicalDelete {
    pub table_name: String,
    pub input: Arc<PhysicalPlan>,
    delete_rows: AtomicU32,
    done: AtomicU32,
}

impl PhysicalDelete {
    pub fn new(table_name: impl Into<String>, input: Arc<PhysicalPlan>) -> Self {
        Self {
            table_name: table_name.into(),
            input,
            delete_rows: AtomicU32::new(0),
            done: AtomicU32::new(0),
        }
    }
}

impl VolcanoExecutor for PhysicalDelete {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init delete executor on {}", self.table_name);
        self.input.init(context)?;
        self.delete_rows.store(0, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        if self.done.swap(1, Ordering::SeqCst) != 0 {
            return Ok(None);
        }
        let table_info = context.catalog.table_by_name(&self.table_name)?;
        let indexes = context.catalog.table_indexes(&self.table_name);

        while let Some((_, rid)) = self.input.next(context)? {
            context.lock_exclusive(rid)?;
            let (meta, tuple) = table_info.table.get_tuple(rid)?;
            if meta.is_deleted {
                continue;
            }

            context.txn.append_table_write_record(TableWriteRecord {
                op: WriteOp::Delete,
                rid,
                heap: table_info.table.clone(),
                old_tuple: None,
            });
            table_info.table.mark_delete(rid)?;

            for index_info in indexes.iter() {
                let key = tuple.project(index_info.key_schema.clone(), &index_info.key_attrs)?;
                index_info.index.remove(&key)?;
                context.txn.append_index_write_record(IndexWriteRecord {
                    op: WriteOp::Delete,
                    rid,
                    index: index_info.index.clone(),
                    key,
                    old_key: None,
                });
            }
            self.delete_rows.fetch_add(1, Ordering::SeqCst);
        }

        let delete_rows = self.delete_rows.swap(0, Ordering::SeqCst);
        Ok(Some((
            Tuple::new(
                self.output_schema(),
                vec![ScalarValue::Int32(Some(delete_rows as i32))],
            ),
            INVALID_RID,
        )))
    }

    fn output_schema(&self) -> SchemaRef {
        DELETE_OUTPUT_SCHEMA_REF.clone()
    }
}

impl std::fmt::Display for PhysicalDelete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Delete({})", self.table_name)
    }
}
