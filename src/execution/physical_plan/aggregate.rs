use crate::catalog::SchemaRef;
use crate::error::{ChalkError, ChalkResult};
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::expression::Expr;
use crate::storage::page::{RecordId, INVALID_RID};
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use super::PhysicalPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(Option<i128>),
    Min(Option<ScalarValue>),
    Max(Option<ScalarValue>),
}

impl Accumulator {
    fn new(func: AggregateFunction) -> Self {
        match func {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum(None),
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    fn update(&mut self, value: &ScalarValue) -> ChalkResult<()> {
        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::Sum(sum) => {
                let addend = value.widened().ok_or_else(|| {
                    ChalkError::Execution("SUM over a null value".to_string())
                })?;
                *sum = Some(sum.unwrap_or(0) + addend);
            }
            Accumulator::Min(min) => {
                if min.as_ref().map(|m| value < m).unwrap_or(true) {
                    *min = Some(value.clone());
                }
            }
            Accumulator::Max(max) => {
                if max.as_ref().map(|m| value > m).unwrap_or(true) {
                    *max = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> ScalarValue {
        match self {
            Accumulator::Count(count) => ScalarValue::Int64(Some(count)),
            Accumulator::Sum(sum) => match sum {
                Some(sum) => ScalarValue::from_widened(sum, crate::catalog::DataType::Int64),
                None => ScalarValue::Int64(None),
            },
            Accumulator::Min(min) => min.unwrap_or(ScalarValue::Int64(None)),
            Accumulator::Max(max) => max.unwrap_or(ScalarValue::Int64(None)),
        }
    }
}

/// Hash aggregation materialized during `init`. Group keys are ordered so
/// the output is deterministic.
#[derive(Debug)]
pub struct PhysicalAggregate {
    pub group_by: Vec<Expr>,
    pub aggregates: Vec<AggregateExpr>,
    pub input: Arc<PhysicalPlan>,
    pub schema: SchemaRef,
    results: Mutex<Option<VecDeque<Tuple>>>,
}

impl PhysicalAggregate {
    pub fn new(
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        input: Arc<PhysicalPlan>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            group_by,
            aggregates,
            input,
            schema,
            results: Mutex::new(None),
        }
    }
}

impl VolcanoExecutor for PhysicalAggregate {
    fn init(&self, context: &mut ExecutionContext) -> ChalkResult<()> {
        debug!("init aggregate executor");
        self.input.init(context)?;

        let mut groups: BTreeMap<Vec<ScalarValue>, Vec<Accumulator>> = BTreeMap::new();
        if self.group_by.is_empty() {
            // A global aggregate emits a row even for empty input.
            groups.insert(
                Vec::new(),
                self.aggregates
                    .iter()
                    .map(|agg| Accumulator::new(agg.func))
                    .collect(),
            );
        }

        while let Some((tuple, _)) = self.input.next(context)? {
            let key = self
                .group_by
                .iter()
                .map(|expr| expr.evaluate(&tuple))
                .collect::<ChalkResult<Vec<ScalarValue>>>()?;
            let accumulators = groups.entry(key).or_insert_with(|| {
                self.aggregates
                    .iter()
                    .map(|agg| Accumulator::new(agg.func))
                    .collect()
            });
            for (accumulator, agg) in accumulators.iter_mut().zip(self.aggregates.iter()) {
                let value = agg.expr.evaluate(&tuple)?;
                accumulator.update(&value)?;
            }
        }

        let mut results = VecDeque::with_capacity(groups.len());
        for (key, accumulators) in groups {
            let mut data = key;
            data.extend(accumulators.into_iter().map(Accumulator::finish));
            results.push_back(Tuple::new(self.schema.clone(), data));
        }
        *self.results.lock() = Some(results);
        Ok(())
    }

    fn next(&self, _context: &mut ExecutionContext) -> ChalkResult<Option<(Tuple, RecordId)>> {
        let mut guard = self.results.lock();
        let results = guard
            .as_mut()
            .ok_or_else(|| ChalkError::Execution("Aggregate not initialized".to_string()))?;
        Ok(results.pop_front().map(|tuple| (tuple, INVALID_RID)))
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl std::fmt::Display for PhysicalAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Aggregate(groups={}, aggs={})",
            self.group_by.len(),
            self.aggregates.len()
        )
    }
}
