use crate::buffer::{AtomicPageId, BufferPoolManager, PageId, INVALID_PAGE_ID};
use crate::catalog::SchemaRef;
use crate::error::ChalkResult;
use crate::storage::codec::TablePageCodec;
use crate::storage::page::{RecordId, TablePage, TupleMeta};
use crate::storage::tuple::Tuple;
use crate::utils::util::page_bytes_to_array;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Tuple storage as a linked list of slotted pages. Overwrite in place, no
/// versioning; deletion is a meta flag so aborts can restore the tuple.
#[derive(Debug)]
pub struct TableHeap {
    pub schema: SchemaRef,
    pub buffer_pool: Arc<BufferPoolManager>,
    pub first_page_id: AtomicPageId,
    pub last_page_id: AtomicPageId,
}

impl TableHeap {
    pub fn try_new(schema: SchemaRef, buffer_pool: Arc<BufferPoolManager>) -> ChalkResult<Self> {
        let first_page = buffer_pool.new_page()?;
        let first_page_id = first_page.page_id;

        let table_page = TablePage::new(schema.clone(), INVALID_PAGE_ID);
        first_page
            .write()
            .set_data(page_bytes_to_array(&TablePageCodec::encode(&table_page)));

        Ok(Self {
            schema,
            buffer_pool,
            first_page_id: AtomicPageId::new(first_page_id),
            last_page_id: AtomicPageId::new(first_page_id),
        })
    }

    /// Insert at the tail page, allocating and linking a new page when full.
    pub fn insert_tuple(&self, tuple: &Tuple) -> ChalkResult<RecordId> {
        let mut current_page_id = self.last_page_id.load(Ordering::SeqCst);

        loop {
            let page_ref = self.buffer_pool.fetch_page(current_page_id)?;
            let mut guard = page_ref.write();
            let (mut table_page, _) = TablePageCodec::decode(guard.data(), self.schema.clone())?;

            if table_page.next_tuple_offset(tuple).is_ok() {
                let slot = table_page.insert_tuple(TupleMeta::default(), tuple)?;
                guard.set_data(page_bytes_to_array(&TablePageCodec::encode(&table_page)));
                return Ok(RecordId::new(current_page_id, slot as u32));
            }

            // Full page; chain a fresh one and retry there.
            let new_page_ref = self.buffer_pool.new_page()?;
            let new_page_id = new_page_ref.page_id;
            let new_table_page = TablePage::new(self.schema.clone(), INVALID_PAGE_ID);
            new_page_ref
                .write()
                .set_data(page_bytes_to_array(&TablePageCodec::encode(&new_table_page)));

            table_page.header.next_page_id = new_page_id;
            guard.set_data(page_bytes_to_array(&TablePageCodec::encode(&table_page)));
            drop(guard);

            self.last_page_id.store(new_page_id, Ordering::SeqCst);
            current_page_id = new_page_id;
        }
    }

    pub fn get_tuple(&self, rid: RecordId) -> ChalkResult<(TupleMeta, Tuple)> {
        let page_ref = self.buffer_pool.fetch_page(rid.page_id)?;
        let guard = page_ref.read();
        let (table_page, _) = TablePageCodec::decode(guard.data(), self.schema.clone())?;
        table_page.get_tuple(rid.slot_num as u16)
    }

    pub fn update_tuple(&self, rid: RecordId, tuple: &Tuple) -> ChalkResult<()> {
        let page_ref = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut guard = page_ref.write();
        let (mut table_page, _) = TablePageCodec::decode(guard.data(), self.schema.clone())?;
        table_page.update_tuple(rid.slot_num as u16, tuple)?;
        guard.set_data(page_bytes_to_array(&TablePageCodec::encode(&table_page)));
        Ok(())
    }

    /// Flag a tuple deleted; the bytes stay so an abort can restore it.
    pub fn mark_delete(&self, rid: RecordId) -> ChalkResult<()> {
        self.set_deleted(rid, true)
    }

    pub fn rollback_delete(&self, rid: RecordId) -> ChalkResult<()> {
        self.set_deleted(rid, false)
    }

    fn set_deleted(&self, rid: RecordId, is_deleted: bool) -> ChalkResult<()> {
        let page_ref = self.buffer_pool.fetch_page(rid.page_id)?;
        let mut guard = page_ref.write();
        let (mut table_page, _) = TablePageCodec::decode(guard.data(), self.schema.clone())?;
        table_page.update_tuple_meta(rid.slot_num as u16, TupleMeta { is_deleted })?;
        guard.set_data(page_bytes_to_array(&TablePageCodec::encode(&table_page)));
        Ok(())
    }

    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator {
            heap: self.clone(),
            current_page_id: self.first_page_id.load(Ordering::SeqCst),
            next_slot: 0,
        }
    }
}

/// Walks every slot of every page in chain order, deleted tuples included;
/// callers filter on the meta flag.
#[derive(Debug)]
pub struct TableIterator {
    heap: Arc<TableHeap>,
    current_page_id: PageId,
    next_slot: u16,
}

impl TableIterator {
    pub fn next(&mut self) -> ChalkResult<Option<(RecordId, TupleMeta, Tuple)>> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let page_ref = self.heap.buffer_pool.fetch_page(self.current_page_id)?;
            let guard = page_ref.read();
            let (table_page, _) = TablePageCodec::decode(guard.data(), self.heap.schema.clone())?;

            if (self.next_slot as usize) < table_page.header.tuple_infos.len() {
                let rid = RecordId::new(self.current_page_id, self.next_slot as u32);
                let (meta, tuple) = table_page.get_tuple(self.next_slot)?;
                self.next_slot += 1;
                return Ok(Some((rid, meta, tuple)));
            }

            self.current_page_id = table_page.header.next_page_id;
            self.next_slot = 0;
        }
    }
}

impl TableHeap {
    /// Count of live (not deleted) tuples; test helper.
    pub fn live_tuple_count(self: &Arc<Self>) -> ChalkResult<usize> {
        let mut iterator = self.iter();
        let mut count = 0;
        while let Some((_, meta, _)) = iterator.next()? {
            if !meta.is_deleted {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl std::fmt::Display for TableHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TableHeap(first={}, last={})",
            self.first_page_id.load(Ordering::SeqCst),
            self.last_page_id.load(Ordering::SeqCst)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TableHeap;
    use crate::buffer::BufferPoolManager;
    use crate::catalog::{Column, DataType, Schema, SchemaRef};
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::disk_scheduler::DiskScheduler;
    use crate::storage::tuple::Tuple;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn build_heap() -> (TempDir, SchemaRef, Arc<TableHeap>) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
        let buffer_pool = Arc::new(BufferPoolManager::new(100, disk_scheduler));
        let schema = Arc::new(Schema::new(vec![
            Column::new("id", DataType::Int64, false),
            Column::new("v", DataType::Int64, false),
        ]));
        let heap = Arc::new(TableHeap::try_new(schema.clone(), buffer_pool).unwrap());
        (temp_dir, schema, heap)
    }

    #[test]
    fn insert_get_update_delete() {
        let (_temp_dir, schema, heap) = build_heap();

        let t1 = Tuple::new(schema.clone(), vec![1i64.into(), 10i64.into()]);
        let rid = heap.insert_tuple(&t1).unwrap();
        let (meta, tuple) = heap.get_tuple(rid).unwrap();
        assert!(!meta.is_deleted);
        assert_eq!(tuple, t1);

        let t1b = Tuple::new(schema.clone(), vec![1i64.into(), 99i64.into()]);
        heap.update_tuple(rid, &t1b).unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap().1, t1b);

        heap.mark_delete(rid).unwrap();
        assert!(heap.get_tuple(rid).unwrap().0.is_deleted);
        heap.rollback_delete(rid).unwrap();
        assert!(!heap.get_tuple(rid).unwrap().0.is_deleted);
    }

    #[test]
    fn iterator_crosses_pages() {
        let (_temp_dir, schema, heap) = build_heap();

        // More tuples than one page holds (19 payload + 5 slot bytes each).
        let total = 600i64;
        for i in 0..total {
            let tuple = Tuple::new(schema.clone(), vec![i.into(), (i * 2).into()]);
            heap.insert_tuple(&tuple).unwrap();
        }

        let mut iterator = heap.iter();
        let mut seen = 0i64;
        while let Some((_, meta, tuple)) = iterator.next().unwrap() {
            assert!(!meta.is_deleted);
            assert_eq!(tuple.data[0], seen.into());
            seen += 1;
        }
        assert_eq!(seen, total);
        assert!(
            heap.first_page_id.load(std::sync::atomic::Ordering::SeqCst)
                != heap.last_page_id.load(std::sync::atomic::Ordering::SeqCst)
        );
    }
}
