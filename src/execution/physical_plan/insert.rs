use crate::catalog::{SchemaRef, INSERT_OUTPUT_SCHEMA_REF};
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

/// Inserts every input row into the heap under an exclusive lock, logs undo
/// records and maintains all secondary indexes. Emits one row-count tuple.
#[derive(Debug)]
pub struct PhysicalInsert {
    pub table_name: String,
    pub input: Arc<PhysicalPlan>,
    insert_rows: AtomicU32,
    done: AtomicU32,
}

impl PhysicalInsert {
    pub fn new(table_name: impl Into<String>, input: Arc<PhysicalPlan>) -> Self {
        Self {
            table_name: table_name.into(),
            input,
            insert_rows: AtomicU32::new(0),
            done: AtomicU32::new(0),
        }
    }
}

impl VolcanoExecutor for PhysicalInsert {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init insert executor on {}", self.table_name);
        self.input.init(context)?;
        self.insert_rows.store(0, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        if self.done.swap(1, Ordering::SeqCst) != 0 {
            return Ok(None);
        }
        let table_info = context.catalog.table_by_name(&self.table_name)?;
        let indexes = context.catalog.table_indexes(&self.table_name);

        while let Some((tuple, _)) = self.input.next(context)? {
            let rid = table_info.table.insert_tuple(&tuple)?;
            context.lock_exclusive(rid)?;
            context.txn.append_table_write_record(TableWriteRecord {
                op: WriteOp::Insert,
                rid,
                heap: table_info.table.clone(),
                old_tuple: None,
            });

            for index_info in indexes.iter() {
                let key = tuple.project(index_info.key_schema.clone(), &index_info.key_attrs)?;
                if index_info.index.insert(&key, rid)? {
                    context.txn.append_index_write_record(IndexWriteRecord {
                        op: WriteOp::Insert,
                        rid,
                        index: index_info.index.clone(),
                        key,
                        old_key: None,
                    });
                }
            }
            self.insert_rows.fetch_add(1, Ordering::SeqCst);
        }

        let insert_rows = self.insert_rows.swap(0, Ordering::SeqCst);
        Ok(Some((
            Tuple::new(
                self.output_schema(),
                vec![ScalarValue::Int32(Some(insert_rows as i32))],
            ),
            INVALID_RID,
        )))
    }

    fn output_schema(&self) -> SchemaRef {
        INSERT_OUTPUT_SCHEMA_REF.clone()
    }
}

impl std::fmt::Display for PhysicalInsert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Insert({})", self.table_name)
    }
}
