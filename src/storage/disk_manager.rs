use crate::buffer::{AtomicPageId, PageId, INDEX_ROOTS_PAGE_ID, PAGE_SIZE};
use crate::error::{ChalkError, ChalkResult};
use bytes::BytesMut;
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

static EMPTY_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];

/// File-backed page store. Page `n` lives at byte offset `n * PAGE_SIZE`;
/// reads past the end of the file yield zeroed buffers so freshly allocated
/// pages decode as empty. Deallocated ids are recycled from an in-memory
/// free list.
#[derive(Debug)]
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicPageId,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    pub fn try_new(path: impl AsRef<Path>) -> ChalkResult<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let len = db_file.metadata()?.len();
        // Page ids 0 (invalid) and 1 (index roots directory) are reserved.
        let next_page_id = std::cmp::max(
            INDEX_ROOTS_PAGE_ID + 1,
            (len as usize / PAGE_SIZE) as PageId,
        );
        debug!(
            "Opened db file {:?}, next page id {}",
            path.as_ref(),
            next_page_id
        );
        Ok(Self {
            db_file: Mutex::new(db_file),
            next_page_id: AtomicPageId::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    pub fn read_page(&self, page_id: PageId) -> ChalkResult<BytesMut> {
        let mut buf = BytesMut::zeroed(PAGE_SIZE);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        let mut read_total = 0;
        while read_total < PAGE_SIZE {
            match file.read(&mut buf[read_total..]) {
                Ok(0) => break,
                Ok(n) => read_total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> ChalkResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(ChalkError::Storage(format!(
                "Page write of {} bytes is not {PAGE_SIZE}",
                data.len()
            )));
        }
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    pub fn allocate_page(&self) -> ChalkResult<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn deallocate_page(&self, page_id: PageId) -> ChalkResult<()> {
        self.write_page(page_id, &EMPTY_PAGE)?;
        self.free_pages.lock().push(page_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DiskManager;
    use crate::buffer::PAGE_SIZE;
    use tempfile::TempDir;

    #[test]
    fn write_read_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();

        let page_id = disk_manager.allocate_page().unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;
        disk_manager.write_page(page_id, &data).unwrap();

        let read = disk_manager.read_page(page_id).unwrap();
        assert_eq!(&read[..], &data[..]);

        // A page never written reads back as zeros.
        let fresh = disk_manager.allocate_page().unwrap();
        let read = disk_manager.read_page(fresh).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn deallocated_pages_are_recycled() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = DiskManager::try_new(temp_dir.path().join("test.db")).unwrap();

        let first = disk_manager.allocate_page().unwrap();
        assert_eq!(first, 2);
        disk_manager.deallocate_page(first).unwrap();
        assert_eq!(disk_manager.allocate_page().unwrap(), first);
        assert_eq!(disk_manager.allocate_page().unwrap(), 3);
    }
}
