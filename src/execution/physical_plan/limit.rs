use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::storage::page::RecordId;
use crate::storage::tuple::Tuple;
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::PhysicalPlan;

#[derive(Debug)]
pub struct PhysicalLimit {
    pub limit: Option<usize>,
    pub offset: usize,
    pub input: Arc<PhysicalPlan>,
    skipped: AtomicUsize,
    emitted: AtomicUsize,
}

impl PhysicalLimit {
    pub fn new(limit: Option<usize>, offset: usize, input: Arc<PhysicalPlan>) -> Self {
        Self {
            limit,
            offset,
            input,
            skipped: AtomicUsize::new(0),
            emitted: AtomicUsize::new(0),
        }
    }
}

impl VolcanoExecutor for PhysicalLimit {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init limit executor");
        self.input.init(context)?;
        self.skipped.store(0, Ordering::SeqCst);
        self.emitted.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        loop {
            if let Some(limit) = self.limit {
                if self.emitted.load(Ordering::SeqCst) >= limit {
                    return Ok(None);
                }
            }
            let Some(entry) = self.input.next(context)? else {
                return Ok(None);
            };
            if self.skipped.load(Ordering::SeqCst) < self.offset {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            self.emitted.fetch_add(1, Ordering::SeqCst);
            return Ok(Some(entry));
        }
    }

    fn output_schema(&self) -> SchemaRef {
        self.input.output_schema()
    }
}

impl std::fmt::Display for PhysicalLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Limit(limit={:?}, offset={})", self.limit, self.offset)
    }
}
