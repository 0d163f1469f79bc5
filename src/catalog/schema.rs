use super::column::{Column, ColumnRef};
use crate::error::{ChalkError, ChalkResult};
use std::sync::{Arc, LazyLock};

pub type SchemaRef = Arc<Schema>;

pub static EMPTY_SCHEMA_REF: LazyLock<SchemaRef> = LazyLock::new(|| Arc::new(Schema::empty()));
pub static INSERT_OUTPUT_SCHEMA_REF: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![Column::new(
        "insert_rows",
        crate::catalog::DataType::Int32,
        false,
    )]))
});
pub static UPDATE_OUTPUT_SCHEMA_REF: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![Column::new(
        "update_rows",
        crate::catalog::DataType::Int32,
        false,
    )]))
});
pub static DELETE_OUTPUT_SCHEMA_REF: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![Column::new(
        "delete_rows",
        crate::catalog::DataType::Int32,
        false,
    )]))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<ColumnRef>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self::new_with_check(columns.into_iter().map(Arc::new).collect())
    }

    fn new_with_check(columns: Vec<ColumnRef>) -> Self {
        for (idx, col1) in columns.iter().enumerate() {
            for col2 in columns.iter().skip(idx + 1) {
                assert_ne!(col1.name, col2.name);
            }
        }
        Self { columns }
    }

    pub fn empty() -> Self {
        Self { columns: vec![] }
    }

    pub fn try_merge(schemas: impl IntoIterator<Item = Self>) -> ChalkResult<Self> {
        let mut columns = Vec::new();
        for schema in schemas {
            columns.extend(schema.columns);
        }
        Ok(Self { columns })
    }

    /// Build a key schema by picking the given column positions.
    pub fn project(&self, indices: &[usize]) -> ChalkResult<Schema> {
        let new_columns = indices
            .iter()
            .map(|i| self.column_with_index(*i))
            .collect::<ChalkResult<Vec<ColumnRef>>>()?;
        Ok(Schema {
            columns: new_columns,
        })
    }

    pub fn column_with_index(&self, index: usize) -> ChalkResult<ColumnRef> {
        self.columns
            .get(index)
            .cloned()
            .ok_or_else(|| ChalkError::Internal(format!("Unable to get column with index {index}")))
    }

    pub fn index_of(&self, name: &str) -> ChalkResult<usize> {
        self.columns
            .iter()
            .position(|col| col.name == name)
            .ok_or_else(|| ChalkError::NotFound(format!("column {name}")))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Fixed on-disk width of a tuple of this schema (null flag + payload per
    /// column).
    pub fn tuple_width(&self) -> usize {
        self.columns
            .iter()
            .map(|col| 1 + col.data_type.width())
            .sum()
    }
}
