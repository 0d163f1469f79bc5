mod aggregate;
mod delete;
mod index_scan;
mod insert;
mod limit;
mod nested_loop_join;
mod seq_scan;
mod update;
mod values;

pub use aggregate::{AggregateExpr, AggregateFunction, PhysicalAggregate};
pub use delete::PhysicalDelete;
pub use index_scan::PhysicalIndexScan;
pub use insert::PhysicalInsert;
pub use limit::PhysicalLimit;
pub use nested_loop_join::PhysicalNestedLoopJoin;
pub use seq_scan::PhysicalSeqScan;
pub use update::PhysicalUpdate;
pub use values::PhysicalValues;

use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::storage::page::RecordId;
use crate::storage::tuple::Tuple;

#[derive(Debug)]
pub enum PhysicalPlan {
    Values(PhysicalValues),
    SeqScan(PhysicalSeqScan),
    IndexScan(PhysicalIndexScan),
    Insert(PhysicalInsert),
    Update(PhysicalUpdate),
    Delete(PhysicalDelete),
    NestedLoopJoin(PhysicalNestedLoopJoin),
    Aggregate(PhysicalAggregate),
    Limit(PhysicalLimit),
}

impl VolcanoExecutor for PhysicalPlan {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        match self {
            PhysicalPlan::Values(executor) => executor.init(context),
            PhysicalPlan::SeqScan(executor) => executor.init(context),
            PhysicalPlan::IndexScan(executor) => executor.init(context),
            PhysicalPlan::Insert(executor) => executor.init(context),
            PhysicalPlan::Update(executor) => executor.init(context),
            PhysicalPlan::Delete(executor) => executor.init(context),
            PhysicalPlan::NestedLoopJoin(executor) => executor.init(context),
            PhysicalPlan::Aggregate(executor) => executor.init(context),
            PhysicalPlan::Limit(executor) => executor.init(context),
        }
    }

    fn next(&self, context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        match self {
            PhysicalPlan::Values(executor) => executor.next(context),
            PhysicalPlan::SeqScan(executor) => executor.next(context),
            PhysicalPlan::IndexScan(executor) => executor.next(context),
            PhysicalPlan::Insert(executor) => executor.next(context),
            PhysicalPlan::Update(executor) => executor.next(context),
            PhysicalPlan::Delete(executor) => executor.next(context),
            PhysicalPlan::NestedLoopJoin(executor) => executor.next(context),
            PhysicalPlan::Aggregate(executor) => executor.next(context),
            PhysicalPlan::Limit(executor) => executor.next(context),
        }
    }

    fn output_schema(&self) -> SchemaRef {
        match self {
            PhysicalPlan::Values(executor) => executor.output_schema(),
            PhysicalPlan::SeqScan(executor) => executor.output_schema(),
            PhysicalPlan::IndexScan(executor) => executor.output_schema(),
            PhysicalPlan::Insert(executor) => executor.output_schema(),
            PhysicalPlan::Update(executor) => executor.output_schema(),
            PhysicalPlan::Delete(executor) => executor.output_schema(),
            PhysicalPlan::NestedLoopJoin(executor) => executor.output_schema(),
            PhysicalPlan::Aggregate(executor) => executor.output_schema(),
            PhysicalPlan::Limit(executor) => executor.output_schema(),
        }
    }
}

impl std::fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhysicalPlan::Values(executor) => write!(f, "{executor}"),
            PhysicalPlan::SeqScan(executor) => write!(f, "{executor}"),
            PhysicalPlan::IndexScan(executor) => write!(f, "{executor}"),
            PhysicalPlan::Insert(executor) => write!(f, "{executor}"),
            PhysicalPlan::Update(executor) => write!(f, "{executor}"),
            PhysicalPlan::Delete(executor) => write!(f, "{executor}"),
            PhysicalPlan::NestedLoopJoin(executor) => write!(f, "{executor}"),
            PhysicalPlan::Aggregate(executor) => write!(f, "{executor}"),
            PhysicalPlan::Limit(executor) => write!(f, "{executor}"),
        }
    }
}
