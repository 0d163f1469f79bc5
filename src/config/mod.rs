use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub buffer_pool_size: usize,
    pub lru_k_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            buffer_pool_size: 1000,
            lru_k_k: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BTreeConfig {
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        BTreeConfig {
            leaf_max_size: 32,
            internal_max_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// How often the background detector scans the waits-for graph.
    pub cycle_detection_interval: Duration,
    pub enable_cycle_detection: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            cycle_detection_interval: Duration::from_millis(50),
            enable_cycle_detection: true,
        }
    }
}
