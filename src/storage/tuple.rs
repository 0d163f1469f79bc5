use crate::catalog::SchemaRef;
use crate::error::{ChalkError, ChalkResult};
use crate::utils::scalar::ScalarValue;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct Tuple {
    pub schema: SchemaRef,
    pub data: Vec<ScalarValue>,
}

impl Tuple {
    pub fn new(schema: SchemaRef, data: Vec<ScalarValue>) -> Self {
        debug_assert_eq!(schema.columns.len(), data.len());
        Self { schema, data }
    }

    /// All-null tuple. Used by the index as the sentinel key of internal
    /// pages.
    pub fn empty(schema: SchemaRef) -> Self {
        let data = schema
            .columns
            .iter()
            .map(|col| ScalarValue::new_empty(col.data_type))
            .collect();
        Self { schema, data }
    }

    pub fn is_null(&self) -> bool {
        self.data.iter().all(|v| v.is_null())
    }

    pub fn value(&self, index: usize) -> ChalkResult<&ScalarValue> {
        self.data.get(index).ok_or_else(|| {
            ChalkError::Internal(format!("No column data at {index} in tuple {self:?}"))
        })
    }

    /// Extract an index key from a heap tuple.
    pub fn project(&self, key_schema: SchemaRef, key_attrs: &[usize]) -> ChalkResult<Tuple> {
        let data = key_attrs
            .iter()
            .map(|idx| self.value(*idx).cloned())
            .collect::<ChalkResult<Vec<ScalarValue>>>()?;
        Ok(Tuple::new(key_schema, data))
    }

    pub fn try_merge(tuples: impl IntoIterator<Item = Self>) -> ChalkResult<Self> {
        let mut data = vec![];
        let mut schemas = vec![];
        for tuple in tuples {
            data.extend(tuple.data);
            schemas.push(tuple.schema.as_ref().clone());
        }
        let merged = crate::catalog::Schema::try_merge(schemas)?;
        Ok(Self::new(std::sync::Arc::new(merged), data))
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Tuple {}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.data.cmp(&other.data)
    }
}
