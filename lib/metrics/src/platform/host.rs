use super::HeapIntrospection;
use crate::metric::{HeapStats, MemoryRegion};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::System;
use tracing::{instrument, trace};

/// Heap introspection of the machine the process runs on.
///
/// Physical memory stands in for the primary region and swap for the auxiliary one. A
/// host without swap reports an auxiliary total of zero, like a board without external
/// RAM. There is no fragmentation information, so the largest free block is the whole
/// free size.
#[derive(Debug)]
pub struct HostHeap {
    system: Mutex<System>,
    min_free_primary: AtomicU64,
    min_free_auxiliary: AtomicU64,
}

impl HostHeap {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            min_free_primary: AtomicU64::new(u64::MAX),
            min_free_auxiliary: AtomicU64::new(u64::MAX),
        }
    }

    fn low_watermark(&self, region: MemoryRegion) -> &AtomicU64 {
        match region {
            MemoryRegion::Primary => &self.min_free_primary,
            MemoryRegion::Auxiliary => &self.min_free_auxiliary,
        }
    }
}

impl Default for HostHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapIntrospection for HostHeap {
    #[instrument(skip(self))]
    fn heap_stats(&self, region: MemoryRegion) -> HeapStats {
        let (free_bytes, total_bytes) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            match region {
                MemoryRegion::Primary => (system.available_memory(), system.total_memory()),
                MemoryRegion::Auxiliary => (system.free_swap(), system.total_swap()),
            }
        };

        if total_bytes == 0 {
            trace!(?region, "Region not present on this host");
            return HeapStats::default();
        }

        let previous_min = self
            .low_watermark(region)
            .fetch_min(free_bytes, Ordering::Relaxed);

        HeapStats::builder()
            .free_bytes(free_bytes)
            .min_free_bytes(previous_min.min(free_bytes))
            .largest_free_block(free_bytes)
            .total_bytes(total_bytes)
            .build()
    }
}
