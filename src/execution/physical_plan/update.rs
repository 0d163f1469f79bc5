use crate::catalog::{SchemaRef, UPDATE_OUTPUT_SCHEMA_REF};
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::expression::Expr;
use crate::storage::page::{RecordId, INVALID_RID};
use crate::storage::tuple::Tuple;
use crate::transaction::{IndexWriteRecord, TableWriteRecord, WriteOp};
use crate::utils::scalar::ScalarValue;
use log::debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::PhysicalPlan;

/// Overwrites matched rows in place under exclusive locks. The pre-image is
/// logged before the heap mutation; indexes whose key changed get a
/// delete+insert pair.
#[derive(Debug)]
pub struct PhysicalUpdate {
    pub table_name: String,
    /// (column position, value expression) applied to the old tuple.
    pub assignments: Vec<(usize, Expr)>,
    pub input: Arc<PhysicalPlan>,
    update_rows: AtomicU32,
    done: AtomicU32,
}

impl PhysicalUpdate {
    pub fn new(
        table_name: impl Into<String>,
        assignments: Vec<(usize, Expr)>,
        input: Arc<PhysicalPlan>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            assignments,
            input,
            update_rows: AtomicU32::new(0),
            done: AtomicU32::new(0),
        }
    }
}

impl VolcanoExecutor for PhysicalUpdate {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init update executor on {}", self.table_name);
        self.input.init(context)?;
        self.update_rows.store(0, Ordering::SeqCst);
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
            // Fresh read under the exclusive lock.
            let (meta, old_tuple) = table_info.table.get_tuple(rid)?;
            if meta.is_deleted {
                continue;
            }

            let mut new_data = old_tuple.data.clone();
            for (column_index, expr) in self.assignments.iter() {
                new_data[*column_index] = expr.evaluate(&old_tuple)?;
            }
            let new_tuple = Tuple::new(table_info.schema.clone(), new_data);

            context.txn.append_table_write_record(TableWriteRecord {
                op: WriteOp::Update,
                rid,
                heap: table_info.table.clone(),
                old_tuple: Some(old_tuple.clone()),
            });
            table_info.table.update_tuple(rid, &new_tuple)?;

            for index_info in indexes.iter() {
                let old_key =
                    old_tuple.project(index_info.key_schema.clone(), &index_info.key_attrs)?;
                let new_key =
                    new_tuple.project(index_info.key_schema.clone(), &index_info.key_attrs)?;
                if old_key == new_key {
                    continue;
                }
                index_info.index.remove(&old_key)?;
                index_info.index.insert(&new_key, rid)?;
                context.txn.append_index_write_record(IndexWriteRecord {
                    op: WriteOp::Update,
                    rid,
                    index: index_info.index.clone(),
                    key: new_key,
                    old_key: Some(old_key),
                });
            }
            self.update_rows.fetch_add(1, Ordering::SeqCst);
        }

        let update_rows = self.update_rows.swap(0, Ordering::SeqCst);
        Ok(Some((
            Tuple::new(
                self.output_schema(),
                vec![ScalarValue::Int32(Some(update_rows as i32))],
            ),
            INVALID_RID,
        )))
    }

    fn output_schema(&self) -> SchemaRef {
        UPDATE_OUTPUT_SCHEMA_REF.clone()
    }
}

impl std::fmt::Display for PhysicalUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Update({})", self.table_name)
    }
}
