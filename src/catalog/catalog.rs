use crate::buffer::BufferPoolManager;
use crate::catalog::SchemaRef;
use crate::config::BTreeConfig;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::index::BPlusTreeIndex;
use crate::storage::table_heap::TableHeap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type TableOid = u32;
pub type IndexOid = u32;

#[derive(Debug)]
pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: SchemaRef,
    pub table: Arc<TableHeap>,
}

#[derive(Debug)]
pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    pub key_schema: SchemaRef,
    /// Positions of the key columns within the table schema.
    pub key_attrs: Vec<usize>,
    pub index: Arc<BPlusTreeIndex>,
}

/// Registry of tables and indexes. Names are unique per namespace;
/// duplicates raise `OutOfRange`, lookups that miss raise `NotFound`.
#[derive(Debug)]
pub struct Catalog {
    pub buffer_pool: Arc<BufferPoolManager>,
    btree_config: BTreeConfig,
    tables: DashMap<String, Arc<TableInfo>>,
    indexes: DashMap<String, Arc<IndexInfo>>,
    table_index_names: DashMap<String, Vec<String>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::with_config(buffer_pool, BTreeConfig::default())
    }

    pub fn with_config(buffer_pool: Arc<BufferPoolManager>, btree_config: BTreeConfig) -> Self {
        Self {
            buffer_pool,
            btree_config,
            tables: DashMap::new(),
            indexes: DashMap::new(),
            table_index_names: DashMap::new(),
            next_table_oid: AtomicU32::new(1),
            next_index_oid: AtomicU32::new(1),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: SchemaRef,
    ) -> ChalkResult<Arc<TableInfo>> {
        let name = name.into();
        if self.tables.contains_key(&name) {
            return Err(ChalkError::OutOfRange(format!(
                "Table {name} already exists"
            )));
        }
        let table = Arc::new(TableHeap::try_new(schema.clone(), self.buffer_pool.clone())?);
        let info = Arc::new(TableInfo {
            oid: self.next_table_oid.fetch_add(1, Ordering::SeqCst),
            name: name.clone(),
            schema,
            table,
        });
        self.tables.insert(name.clone(), info.clone());
        self.table_index_names.insert(name, Vec::new());
        Ok(info)
    }

    pub fn table_by_name(&self, name: &str) -> ChalkResult<Arc<TableInfo>> {
        self.tables
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ChalkError::NotFound(format!("table {name}")))
    }

    pub fn table_by_oid(&self, oid: TableOid) -> ChalkResult<Arc<TableInfo>> {
        self.tables
            .iter()
            .find(|entry| entry.oid == oid)
            .map(|entry| entry.clone())
            .ok_or_else(|| ChalkError::NotFound(format!("table oid {oid}")))
    }

    /// Create a secondary index over `key_attrs` of an existing table and
    /// backfill it from the current heap contents.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
    ) -> ChalkResult<Arc<IndexInfo>> {
        let index_name = index_name.into();
        if self.indexes.contains_key(&index_name) {
            return Err(ChalkError::OutOfRange(format!(
                "Index {index_name} already exists"
            )));
        }
        let table_info = self.table_by_name(table_name)?;
        let key_schema = Arc::new(table_info.schema.project(&key_attrs)?);
        let index = Arc::new(BPlusTreeIndex::try_new(
            index_name.clone(),
            key_schema.clone(),
            self.buffer_pool.clone(),
            self.btree_config.leaf_max_size,
            self.btree_config.internal_max_size,
        )?);

        let mut iterator = table_info.table.iter();
        while let Some((rid, meta, tuple)) = iterator.next()? {
            if meta.is_deleted {
                continue;
            }
            let key = tuple.project(key_schema.clone(), &key_attrs)?;
            index.insert(&key, rid)?;
        }

        let info = Arc::new(IndexInfo {
            oid: self.next_index_oid.fetch_add(1, Ordering::SeqCst),
            name: index_name.clone(),
            table_name: table_name.to_string(),
            key_schema,
            key_attrs,
            index,
        });
        self.indexes.insert(index_name.clone(), info.clone());
        self.table_index_names
            .entry(table_name.to_string())
            .or_default()
            .push(index_name);
        Ok(info)
    }

    pub fn index_by_name(&self, name: &str) -> ChalkResult<Arc<IndexInfo>> {
        self.indexes
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ChalkError::NotFound(format!("index {name}")))
    }

    pub fn index_by_oid(&self, oid: IndexOid) -> ChalkResult<Arc<IndexInfo>> {
        self.indexes
            .iter()
            .find(|entry| entry.oid == oid)
            .map(|entry| entry.clone())
            .ok_or_else(|| ChalkError::NotFound(format!("index oid {oid}")))
    }

    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let Some(names) = self.table_index_names.get(table_name) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| self.indexes.get(name).map(|entry| entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::buffer::BufferPoolManager;
    use crate::catalog::{Column, DataType, Schema};
    use crate::error::ChalkError;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::disk_scheduler::DiskScheduler;
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build_catalog() -> (TempDir, Catalog) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
        let buffer_pool = Arc::new(BufferPoolManager::new(200, disk_scheduler));
        (temp_dir, Catalog::new(buffer_pool))
    }

    #[test]
    fn create_and_look_up_table() {
        let (_temp_dir, catalog) = build_catalog();
        let schema = Arc::new(Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("v", DataType::Int32, false),
        ]));

        let info = catalog.create_table("t", schema.clone()).unwrap();
        assert_eq!(info.name, "t");
        assert!(matches!(
            catalog.create_table("t", schema),
            Err(ChalkError::OutOfRange(_))
        ));
        assert!(catalog.table_by_name("t").is_ok());
        assert!(matches!(
            catalog.table_by_name("missing"),
            Err(ChalkError::NotFound(_))
        ));
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let (_temp_dir, catalog) = build_catalog();
        let schema = Arc::new(Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("v", DataType::Int32, false),
        ]));
        let table_info = catalog.create_table("t", schema.clone()).unwrap();

        let mut rids = vec![];
        for i in 0..10i64 {
            let tuple = Tuple::new(schema.clone(), vec![i.into(), (i as i32).into()]);
            rids.push(table_info.table.insert_tuple(&tuple).unwrap());
        }

        let index_info = catalog.create_index("t_id_idx", "t", vec![0]).unwrap();
        for i in 0..10i64 {
            let key = Tuple::new(index_info.key_schema.clone(), vec![i.into()]);
            assert_eq!(index_info.index.get(&key).unwrap(), Some(rids[i as usize]));
        }

        assert_eq!(catalog.table_indexes("t").len(), 1);
        assert!(matches!(
            catalog.create_index("t_id_idx", "t", vec![0]),
            Err(ChalkError::OutOfRange(_))
        ));
    }
}
