use crate::buffer::FrameId;
use crate::utils::cache::lru_k::LRUKReplacer;
use crate::utils::cache::Replacer;
use dashmap::DashMap;
use log::error;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type PageId = u32;
pub type AtomicPageId = AtomicU32;

pub const INVALID_PAGE_ID: PageId = 0;
/// Reserved page holding the persistent index-name -> root page id map.
/// Ordinary allocation starts after it.
pub const INDEX_ROOTS_PAGE_ID: PageId = 1;
pub const PAGE_SIZE: usize = 4096;

/// An owned read latch on a page frame. Independent of the `PageRef` that
/// produced it, so crabbing code can keep a queue of held latches.
pub type PageReadLatch = parking_lot::lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, Page>;
pub type PageWriteLatch = parking_lot::lock_api::ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>;

#[derive(Debug)]
pub struct Page {
    pub page_id: PageId,
    data: [u8; PAGE_SIZE],
    pub is_dirty: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self::new(INVALID_PAGE_ID)
    }

    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
            is_dirty: false,
        }
    }

    pub fn destroy(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.data = [0; PAGE_SIZE];
        self.is_dirty = false;
    }

    pub fn set_data(&mut self, data: [u8; PAGE_SIZE]) {
        self.data = data;
        self.is_dirty = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A pinned reference to a buffer pool frame. Dropping the last ref for a
/// page makes its frame evictable again.
#[derive(Debug)]
pub struct PageRef {
    pub page: Arc<RwLock<Page>>,
    pub page_id: PageId,
    pin: Arc<AtomicU32>,
    page_table: Arc<DashMap<PageId, FrameId>>,
    replacer: Arc<RwLock<LRUKReplacer>>,
}

impl PageRef {
    pub(crate) fn new(
        page: Arc<RwLock<Page>>,
        page_id: PageId,
        pin: Arc<AtomicU32>,
        page_table: Arc<DashMap<PageId, FrameId>>,
        replacer: Arc<RwLock<LRUKReplacer>>,
    ) -> Self {
        Self {
            page,
            page_id,
            pin,
            page_table,
            replacer,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Take the page latch in read mode as an owned guard.
    pub fn read_latch(&self) -> PageReadLatch {
        self.page.read_arc()
    }

    /// Take the page latch in write mode as an owned guard.
    pub fn write_latch(&self) -> PageWriteLatch {
        self.page.write_arc()
    }

    pub fn pin_count(&self) -> u32 {
        self.pin.load(Ordering::SeqCst)
    }
}

impl Clone for PageRef {
    fn clone(&self) -> Self {
        self.pin.fetch_add(1, Ordering::SeqCst);
        Self {
            page: self.page.clone(),
            page_id: self.page_id,
            pin: self.pin.clone(),
            page_table: self.page_table.clone(),
            replacer: self.replacer.clone(),
        }
    }
}

impl Drop for PageRef {
    fn drop(&mut self) {
        if self.pin.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(frame_id) = self.page_table.get(&self.page_id) {
                if let Err(e) = self.replacer.write().set_evictable(*frame_id, true) {
                    error!("Failed to set frame {} evictable: {e}", *frame_id);
                }
            }
        }
    }
}
