use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::buffer::page::{Page, PageId, PageRef, PAGE_SIZE};
use crate::catalog::SchemaRef;
use crate::config::BufferPoolConfig;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::codec::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec, TablePageCodec,
};
use crate::storage::disk_scheduler::DiskScheduler;
use crate::storage::page::{BPlusTreeInternalPage, BPlusTreeLeafPage, BPlusTreePage, TablePage};
use crate::utils::cache::lru_k::LRUKReplacer;
use crate::utils::cache::Replacer;

pub type FrameId = usize;

#[derive(Debug)]
pub struct BufferPoolManager {
    pool: Vec<Arc<RwLock<Page>>>,
    pins: Vec<Arc<AtomicU32>>,
    pub replacer: Arc<RwLock<LRUKReplacer>>,
    pub disk_scheduler: Arc<DiskScheduler>,
    page_table: Arc<DashMap<PageId, FrameId>>,
    free_list: Mutex<VecDeque<FrameId>>,
}

impl BufferPoolManager {
    pub fn new(num_pages: usize, disk_scheduler: Arc<DiskScheduler>) -> Self {
        Self::with_config(
            BufferPoolConfig {
                buffer_pool_size: num_pages,
                ..BufferPoolConfig::default()
            },
            disk_scheduler,
        )
    }

    pub fn with_config(config: BufferPoolConfig, disk_scheduler: Arc<DiskScheduler>) -> Self {
        let num_pages = config.buffer_pool_size;
        let mut free_list = VecDeque::with_capacity(num_pages);
        let mut pool = Vec::with_capacity(num_pages);
        let mut pins = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            free_list.push_back(i);
            pool.push(Arc::new(RwLock::new(Page::empty())));
            pins.push(Arc::new(AtomicU32::new(0)));
        }

        Self {
            pool,
            pins,
            replacer: Arc::new(RwLock::new(LRUKReplacer::with_k(num_pages, config.lru_k_k))),
            disk_scheduler,
            page_table: Arc::new(DashMap::new()),
            free_list: Mutex::new(free_list),
        }
    }

    /// Allocate a fresh page on disk and pin it into a frame.
    pub fn new_page(&self) -> ChalkResult<PageRef> {
        let frame_id = self.allocate_frame()?;

        let new_page_id = self
            .disk_scheduler
            .schedule_allocate()?
            .recv()
            .map_err(|e| ChalkError::Internal(format!("Failed to receive allocated page: {e}")))??;

        *self.pool[frame_id].write() = Page::new(new_page_id);
        self.pins[frame_id].store(1, Ordering::SeqCst);
        self.page_table.insert(new_page_id, frame_id);

        let mut replacer = self.replacer.write();
        replacer.record_access(frame_id)?;
        replacer.set_evictable(frame_id, false)?;
        drop(replacer);

        Ok(self.page_ref(new_page_id, frame_id))
    }

    /// Fetch (and pin) a page, reading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> ChalkResult<PageRef> {
        if let Some(frame_id_ref) = self.page_table.get(&page_id) {
            let frame_id = *frame_id_ref;
            drop(frame_id_ref);
            self.pins[frame_id].fetch_add(1, Ordering::SeqCst);
            let mut replacer = self.replacer.write();
            replacer.record_access(frame_id)?;
            replacer.set_evictable(frame_id, false)?;
            drop(replacer);
            return Ok(self.page_ref(page_id, frame_id));
        }

        let frame_id = self.allocate_frame()?;
        let page_data = self
            .disk_scheduler
            .schedule_read(page_id)?
            .recv()
            .map_err(|e| ChalkError::Internal(format!("Failed to receive page data: {e}")))??;

        let mut data = [0u8; PAGE_SIZE];
        let copy_len = std::cmp::min(page_data.len(), PAGE_SIZE);
        data[..copy_len].copy_from_slice(&page_data[..copy_len]);

        {
            let mut page = self.pool[frame_id].write();
            *page = Page::new(page_id);
            page.set_data(data);
            page.is_dirty = false;
        }
        self.pins[frame_id].store(1, Ordering::SeqCst);
        self.page_table.insert(page_id, frame_id);

        let mut replacer = self.replacer.write();
        replacer.record_access(frame_id)?;
        replacer.set_evictable(frame_id, false)?;
        drop(replacer);

        Ok(self.page_ref(page_id, frame_id))
    }

    pub fn fetch_table_page(
        &self,
        page_id: PageId,
        schema: SchemaRef,
    ) -> ChalkResult<(PageRef, TablePage)> {
        let page = self.fetch_page(page_id)?;
        let (table_page, _) = TablePageCodec::decode(page.read().data(), schema)?;
        Ok((page, table_page))
    }

    pub fn fetch_tree_page(
        &self,
        page_id: PageId,
        key_schema: SchemaRef,
    ) -> ChalkResult<(PageRef, BPlusTreePage)> {
        let page = self.fetch_page(page_id)?;
        let (tree_page, _) = BPlusTreePageCodec::decode(page.read().data(), key_schema)?;
        Ok((page, tree_page))
    }

    pub fn fetch_tree_internal_page(
        &self,
        page_id: PageId,
        key_schema: SchemaRef,
    ) -> ChalkResult<(PageRef, BPlusTreeInternalPage)> {
        let page = self.fetch_page(page_id)?;
        let (tree_page, _) = BPlusTreeInternalPageCodec::decode(page.read().data(), key_schema)?;
        Ok((page, tree_page))
    }

    pub fn fetch_tree_leaf_page(
        &self,
        page_id: PageId,
        key_schema: SchemaRef,
    ) -> ChalkResult<(PageRef, BPlusTreeLeafPage)> {
        let page = self.fetch_page(page_id)?;
        let (tree_page, _) = BPlusTreeLeafPageCodec::decode(page.read().data(), key_schema)?;
        Ok((page, tree_page))
    }

    pub fn flush_page(&self, page_id: PageId) -> ChalkResult<bool> {
        let Some(frame_id_ref) = self.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame_id = *frame_id_ref;
        drop(frame_id_ref);

        let data = {
            let page = self.pool[frame_id].read();
            Bytes::copy_from_slice(page.data())
        };
        self.disk_scheduler
            .schedule_write(page_id, data)?
            .recv()
            .map_err(|e| ChalkError::Internal(format!("Failed to receive flush result: {e}")))??;
        self.pool[frame_id].write().is_dirty = false;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> ChalkResult<()> {
        let page_ids: Vec<PageId> = self.page_table.iter().map(|e| *e.key()).collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and the disk. Refuses pinned pages.
    pub fn delete_page(&self, page_id: PageId) -> ChalkResult<bool> {
        if let Some(frame_id_ref) = self.page_table.get(&page_id) {
            let frame_id = *frame_id_ref;
            drop(frame_id_ref);

            if self.pins[frame_id].load(Ordering::SeqCst) > 0 {
                return Ok(false);
            }

            self.pool[frame_id].write().destroy();
            self.page_table.remove(&page_id);
            self.replacer.write().remove(frame_id);
            self.free_list.lock().push_back(frame_id);
        }

        self.disk_scheduler
            .schedule_deallocate(page_id)?
            .recv()
            .map_err(|e| {
                ChalkError::Internal(format!("Failed to receive deallocate result: {e}"))
            })??;
        Ok(true)
    }

    fn page_ref(&self, page_id: PageId, frame_id: FrameId) -> PageRef {
        PageRef::new(
            self.pool[frame_id].clone(),
            page_id,
            self.pins[frame_id].clone(),
            self.page_table.clone(),
            self.replacer.clone(),
        )
    }

    fn allocate_frame(&self) -> ChalkResult<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }
        let Some(frame_id) = self.replacer.write().evict() else {
            return Err(ChalkError::OutOfMemory(
                "Buffer pool is full and no frame is evictable".to_string(),
            ));
        };

        let (evicted_page_id, dirty_data) = {
            let page = self.pool[frame_id].read();
            let data = page
                .is_dirty
                .then(|| Bytes::copy_from_slice(page.data()));
            (page.page_id, data)
        };
        if let Some(data) = dirty_data {
            self.disk_scheduler
                .schedule_write(evicted_page_id, data)?
                .recv()
                .map_err(|e| {
                    ChalkError::Internal(format!("Failed to receive eviction flush result: {e}"))
                })??;
        }
        self.page_table.remove(&evicted_page_id);
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferPoolManager;
    use crate::storage::disk_manager::DiskManager;
    use crate::storage::disk_scheduler::DiskScheduler;
    use crate::utils::cache::Replacer;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(num_pages: usize) -> (TempDir, Arc<BufferPoolManager>) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
        let buffer_pool = Arc::new(BufferPoolManager::new(num_pages, disk_scheduler));
        (temp_dir, buffer_pool)
    }

    #[test]
    fn new_page_fills_pool() {
        let (_temp_dir, buffer_pool) = setup(3);

        let page1 = buffer_pool.new_page().unwrap();
        let page1_id = page1.page_id;
        let _page2 = buffer_pool.new_page().unwrap();
        let _page3 = buffer_pool.new_page().unwrap();

        // Every frame pinned; a fourth page cannot be placed.
        assert!(buffer_pool.new_page().is_err());

        drop(page1);
        let page5 = buffer_pool.new_page().unwrap();
        assert_ne!(page5.page_id, page1_id);
        assert!(buffer_pool.page_table.get(&page1_id).is_none());
    }

    #[test]
    fn unpin_makes_frame_evictable() {
        let (_temp_dir, buffer_pool) = setup(3);

        let page1 = buffer_pool.new_page().unwrap();
        let _page2 = buffer_pool.new_page().unwrap();
        let _page3 = buffer_pool.new_page().unwrap();
        assert!(buffer_pool.new_page().is_err());

        drop(page1);
        assert_eq!(buffer_pool.replacer.read().size(), 1);
        assert!(buffer_pool.new_page().is_ok());
        assert_eq!(buffer_pool.replacer.read().size(), 0);
    }

    #[test]
    fn fetch_page_round_trips_through_disk() {
        let (_temp_dir, buffer_pool) = setup(3);

        let page1 = buffer_pool.new_page().unwrap();
        let page1_id = page1.page_id;
        {
            let mut guard = page1.write();
            let mut data = [0u8; crate::buffer::PAGE_SIZE];
            data[100] = 42;
            guard.set_data(data);
        }
        let _p2 = buffer_pool.new_page().unwrap();
        let _p3 = buffer_pool.new_page().unwrap();
        drop(page1);

        // Evict page1 by demanding a fourth page.
        let p4 = buffer_pool.new_page().unwrap();
        assert!(buffer_pool.page_table.get(&page1_id).is_none());
        drop(p4);

        let page = buffer_pool.fetch_page(page1_id).unwrap();
        assert_eq!(page.page_id, page1_id);
        assert_eq!(page.pin_count(), 1);
        assert_eq!(page.read().data()[100], 42);
    }

    #[test]
    fn delete_page_refuses_pinned() {
        let (_temp_dir, buffer_pool) = setup(3);

        let page1 = buffer_pool.new_page().unwrap();
        let page1_id = page1.page_id;
        assert!(!buffer_pool.delete_page(page1_id).unwrap());

        drop(page1);
        assert!(buffer_pool.delete_page(page1_id).unwrap());
        assert!(buffer_pool.page_table.get(&page1_id).is_none());

        // The freed frame is reusable and the page reads back as zeros.
        let page = buffer_pool.fetch_page(page1_id).unwrap();
        assert!(page.read().data().iter().all(|&b| b == 0));
    }
}
