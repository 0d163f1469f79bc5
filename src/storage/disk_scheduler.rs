use crate::buffer::PageId;
use crate::error::{ChalkError, ChalkResult};
use crate::storage::disk_manager::DiskManager;
use bytes::{Bytes, BytesMut};
use log::warn;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

pub type DiskResultSender<T> = Sender<ChalkResult<T>>;
pub type DiskResultReceiver<T> = Receiver<ChalkResult<T>>;

/// Commands handled by the background I/O worker. Every request carries a
/// result sender so the caller can block on completion.
#[derive(Debug)]
pub enum DiskRequest {
    ReadPage {
        page_id: PageId,
        result_sender: DiskResultSender<BytesMut>,
    },
    WritePage {
        page_id: PageId,
        data: Bytes,
        result_sender: DiskResultSender<()>,
    },
    AllocatePage {
        result_sender: DiskResultSender<PageId>,
    },
    DeallocatePage {
        page_id: PageId,
        result_sender: DiskResultSender<()>,
    },
    Shutdown,
}

#[derive(Debug)]
pub struct DiskScheduler {
    request_sender: Sender<DiskRequest>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (request_sender, request_receiver) = mpsc::channel::<DiskRequest>();
        let worker = thread::Builder::new()
            .name("chalkdb-disk-io".to_string())
            .spawn(move || Self::run_worker(disk_manager, request_receiver))
            .expect("failed to spawn disk io thread");
        Self {
            request_sender,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        while let Ok(request) = receiver.recv() {
            match request {
                DiskRequest::ReadPage {
                    page_id,
                    result_sender,
                } => {
                    let _ = result_sender.send(disk_manager.read_page(page_id));
                }
                DiskRequest::WritePage {
                    page_id,
                    data,
                    result_sender,
                } => {
                    let _ = result_sender.send(disk_manager.write_page(page_id, &data));
                }
                DiskRequest::AllocatePage { result_sender } => {
                    let _ = result_sender.send(disk_manager.allocate_page());
                }
                DiskRequest::DeallocatePage {
                    page_id,
                    result_sender,
                } => {
                    let _ = result_sender.send(disk_manager.deallocate_page(page_id));
                }
                DiskRequest::Shutdown => break,
            }
        }
    }

    fn schedule(&self, request: DiskRequest) -> ChalkResult<()> {
        self.request_sender
            .send(request)
            .map_err(|e| ChalkError::Internal(format!("Failed to send disk request: {e}")))
    }

    pub fn schedule_read(&self, page_id: PageId) -> ChalkResult<DiskResultReceiver<BytesMut>> {
        let (result_sender, result_receiver) = mpsc::channel();
        self.schedule(DiskRequest::ReadPage {
            page_id,
            result_sender,
        })?;
        Ok(result_receiver)
    }

    pub fn schedule_write(
        &self,
        page_id: PageId,
        data: Bytes,
    ) -> ChalkResult<DiskResultReceiver<()>> {
        let (result_sender, result_receiver) = mpsc::channel();
        self.schedule(DiskRequest::WritePage {
            page_id,
            data,
            result_sender,
        })?;
        Ok(result_receiver)
    }

    pub fn schedule_allocate(&self) -> ChalkResult<DiskResultReceiver<PageId>> {
        let (result_sender, result_receiver) = mpsc::channel();
        self.schedule(DiskRequest::AllocatePage { result_sender })?;
        Ok(result_receiver)
    }

    pub fn schedule_deallocate(&self, page_id: PageId) -> ChalkResult<DiskResultReceiver<()>> {
        let (result_sender, result_receiver) = mpsc::channel();
        self.schedule(DiskRequest::DeallocatePage {
            page_id,
            result_sender,
        })?;
        Ok(result_receiver)
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        if self.request_sender.send(DiskRequest::Shutdown).is_err() {
            warn!("Disk io thread exited before shutdown request");
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DiskScheduler;
    use crate::storage::disk_manager::DiskManager;
    use bytes::Bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn scheduled_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let scheduler = DiskScheduler::new(disk_manager);

        let page_id = scheduler
            .schedule_allocate()
            .unwrap()
            .recv()
            .unwrap()
            .unwrap();
        let data = Bytes::from(vec![7u8; crate::buffer::PAGE_SIZE]);
        scheduler
            .schedule_write(page_id, data.clone())
            .unwrap()
            .recv()
            .unwrap()
            .unwrap();

        let read = scheduler
            .schedule_read(page_id)
            .unwrap()
            .recv()
            .unwrap()
            .unwrap();
        assert_eq!(&read[..], &data[..]);
    }
}
