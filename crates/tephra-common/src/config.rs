//! Configuration structures for TephraDB.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the buffer pool manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// K parameter of the LRU-K replacement policy.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

/// Configuration for the lock manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockManagerConfig {
    /// Interval between deadlock detection passes, in milliseconds.
    pub cycle_detection_interval_ms: u64,
}

impl LockManagerConfig {
    /// Returns the detection interval as a Duration.
    pub fn cycle_detection_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_detection_interval_ms)
    }
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval_ms: 50,
        }
    }
}
