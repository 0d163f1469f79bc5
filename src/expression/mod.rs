use crate::error::{ChalkError, ChalkResult};
use crate::storage::tuple::Tuple;
use crate::utils::scalar::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    And,
    Or,
}

/// Minimal expression tree for executor predicates and aggregates: column
/// references are positional within the input tuple.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(usize),
    Literal(ScalarValue),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn column(index: usize) -> Expr {
        Expr::Column(index)
    }

    pub fn literal(value: impl Into<ScalarValue>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn evaluate(&self, tuple: &Tuple) -> ChalkResult<ScalarValue> {
        match self {
            Expr::Column(index) => tuple.value(*index).cloned(),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Binary { op, left, right } => {
                let lhs = left.evaluate(tuple)?;
                let rhs = right.evaluate(tuple)?;
                let result = match op {
                    BinaryOp::Eq => lhs == rhs,
                    BinaryOp::NotEq => lhs != rhs,
                    BinaryOp::Gt => lhs > rhs,
                    BinaryOp::GtEq => lhs >= rhs,
                    BinaryOp::Lt => lhs < rhs,
                    BinaryOp::LtEq => lhs <= rhs,
                    BinaryOp::And => {
                        lhs.as_boolean()?.unwrap_or(false) && rhs.as_boolean()?.unwrap_or(false)
                    }
                    BinaryOp::Or => {
                        lhs.as_boolean()?.unwrap_or(false) || rhs.as_boolean()?.unwrap_or(false)
                    }
                };
                Ok(ScalarValue::Boolean(Some(result)))
            }
        }
    }

    pub fn evaluate_as_predicate(&self, tuple: &Tuple) -> ChalkResult<bool> {
        match self.evaluate(tuple)? {
            ScalarValue::Boolean(value) => Ok(value.unwrap_or(false)),
            other => Err(ChalkError::Execution(format!(
                "Predicate evaluated to non-boolean {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryOp, Expr};
    use crate::catalog::{Column, DataType, Schema};
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;

    #[test]
    fn comparison_and_logic() {
        let schema = Arc::new(Schema::new(vec![
            Column::new("a", DataType::Int32, false),
            Column::new("b", DataType::Int64, false),
        ]));
        let tuple = Tuple::new(schema, vec![3i32.into(), 10i64.into()]);

        let expr = Expr::binary(
            BinaryOp::And,
            Expr::binary(BinaryOp::Gt, Expr::column(0), Expr::literal(1i32)),
            Expr::binary(BinaryOp::LtEq, Expr::column(1), Expr::literal(10i64)),
        );
        assert!(expr.evaluate_as_predicate(&tuple).unwrap());

        let expr = Expr::binary(BinaryOp::Eq, Expr::column(0), Expr::literal(4i32));
        assert!(!expr.evaluate_as_predicate(&tuple).unwrap());
    }
}
