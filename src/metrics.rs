//! Cache metrics for monitoring and debugging.
//!
//! Tracks allocation, free, copy-on-write, and swap volume at the device
//! facade. Counters are relaxed atomics so an engine can hold the struct in
//! an `Arc` and read it from a metrics endpoint without coordination.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Allocation requests (one per allocate call, any block count)
    allocations: AtomicU64,
    /// Total blocks allocated
    blocks_allocated: AtomicU64,
    /// Total blocks freed
    blocks_freed: AtomicU64,
    /// Copy-on-write events recorded
    copy_on_writes: AtomicU64,
    /// Blocks moved between devices
    blocks_swapped: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allocation(&self, num_blocks: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.blocks_allocated
            .fetch_add(num_blocks as u64, Ordering::Relaxed);
    }

    pub fn record_free(&self, num_blocks: usize) {
        self.blocks_freed
            .fetch_add(num_blocks as u64, Ordering::Relaxed);
    }

    pub fn record_copy_on_write(&self) {
        self.copy_on_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swap(&self, num_blocks: usize) {
        self.blocks_swapped
            .fetch_add(num_blocks as u64, Ordering::Relaxed);
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn blocks_allocated(&self) -> u64 {
        self.blocks_allocated.load(Ordering::Relaxed)
    }

    pub fn blocks_freed(&self) -> u64 {
        self.blocks_freed.load(Ordering::Relaxed)
    }

    pub fn copy_on_writes(&self) -> u64 {
        self.copy_on_writes.load(Ordering::Relaxed)
    }

    pub fn blocks_swapped(&self) -> u64 {
        self.blocks_swapped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.blocks_allocated.store(0, Ordering::Relaxed);
        self.blocks_freed.store(0, Ordering::Relaxed);
        self.copy_on_writes.store(0, Ordering::Relaxed);
        self.blocks_swapped.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: self.allocations(),
            blocks_allocated: self.blocks_allocated(),
            blocks_freed: self.blocks_freed(),
            copy_on_writes: self.copy_on_writes(),
            blocks_swapped: self.blocks_swapped(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub blocks_allocated: u64,
    pub blocks_freed: u64,
    pub copy_on_writes: u64,
    pub blocks_swapped: u64,
}
