use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::storage::page::{RecordId, INVALID_RID};
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Literal rows, the usual input of an insert plan.
#[derive(Debug)]
pub struct PhysicalValues {
    pub schema: SchemaRef,
    pub rows: Vec<Vec<ScalarValue>>,
    cursor: AtomicUsize,
}

impl PhysicalValues {
    pub fn new(schema: SchemaRef, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self {
            schema,
            rows,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl VolcanoExecutor for PhysicalValues {
    fn init(&self, _context: &mut ExecutionContext) -> ChalkResult<()> {
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, _context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.get(index).map(|row| {
            (
                Tuple::new(self.schema.clone(), row.clone()),
                INVALID_RID,
            )
        }))
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Values({} rows)", self.rows.len())
    }
}
