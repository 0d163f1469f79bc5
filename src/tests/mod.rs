mod transaction_tests;

use crate::buffer::BufferPoolManager;
use crate::catalog::Catalog;
use crate::config::{BTreeConfig, LockConfig};
use crate::storage::disk_manager::DiskManager;
use crate::storage::disk_scheduler::DiskScheduler;
use crate::transaction::{LockManager, TransactionManager};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) struct TestDb {
    _temp_dir: TempDir,
    pub catalog: Catalog,
    pub txn_manager: TransactionManager,
}

/// A full stack on a temp file: disk, buffer pool, catalog, lock manager
/// with a fast detector, transaction manager. Small node sizes force real
/// tree structure in executor tests.
pub(crate) fn test_db() -> TestDb {
    let temp_dir = TempDir::new().unwrap();
    let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
    let disk_scheduler = Arc::new(DiskScheduler::new(disk_manager));
    let buffer_pool = Arc::new(BufferPoolManager::new(500, disk_scheduler));
    let lock_manager = LockManager::new(LockConfig {
        cycle_detection_interval: Duration::from_millis(20),
        enable_cycle_detection: true,
    });
    let catalog = Catalog::with_config(
        buffer_pool,
        BTreeConfig {
            leaf_max_size: 4,
            internal_max_size: 4,
        },
    );
    let txn_manager = TransactionManager::new(lock_manager);
    TestDb {
        _temp_dir: temp_dir,
        catalog,
        txn_manager,
    }
}
