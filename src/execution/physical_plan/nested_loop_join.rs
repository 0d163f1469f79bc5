use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::expression::Expr;
use crate::storage::page::{RecordId, INVALID_RID};
use crate::storage::tuple::Tuple;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

use super::PhysicalPlan;

/// Inner join by nested iteration: the right side is re-initialized for
/// every outer row.
#[derive(Debug)]
pub struct PhysicalNestedLoopJoin {
    pub condition: Option<Expr>,
    pub left_input: Arc<PhysicalPlan>,
    pub right_input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,
    left_tuple: Mutex<Option<Tuple>>,
}

impl PhysicalNestedLoopJoin {
    pub fn new(
        condition: Option<Expr>,
        left_input: Arc<PhysicalPlan>,
        right_input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            condition,
            left_input,
            right_input,
            schema,
            left_tuple: Mutex::new(None),
        }
    }
}

impl VolcanoExecutor for PhysicalNestedLoopJoin {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init nested loop join executor");
        self.left_input.init(context)?;
        self.right_input.init(context)?;
        *self.left_tuple.lock() = None;
        Ok(())
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        let mut left_next_tuple = match self.left_tuple.lock().clone() {
            Some(tuple) => Some(tuple),
            None => self.left_input.next(context)?.map(|(tuple, _)| tuple),
        };

        while let Some(left_tuple) = left_next_tuple {
            while let Some((right_tuple, _)) = self.right_input.next(context)? {
                let merged = Tuple::try_merge(vec![left_tuple.clone(), right_tuple])?;
                let matches = match &self.condition {
                    Some(condition) => context.evaluate_predicate(condition, &merged)?,
                    None => true,
                };
                if matches {
                    *self.left_tuple.lock() = Some(left_tuple);
                    return Ok(Some((merged, INVALID_RID)));
                }
            }

            // Inner side exhausted; restart it for the next outer row.
            self.right_input.init(context)?;
            left_next_tuple = self.left_input.next(context)?.map(|(tuple, _)| tuple);
            *self.left_tuple.lock() = None;
        }
        Ok(None)
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalNestedLoopJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NestedLoopJoin")
    }
}
