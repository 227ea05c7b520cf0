use crate::metric::{MemoryRegion, MemorySample};
use crate::platform::HeapIntrospection;
use tracing::{info, instrument};

/// Snapshots heap statistics of the primary and auxiliary regions.
///
/// The only state kept across ticks is whether the auxiliary region has ever been seen.
/// Once it has, it is reported on every tick for the rest of the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatsCollector {
    auxiliary_seen: bool,
}

impl MemoryStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip_all)]
    pub fn collect(&mut self, heap: &dyn HeapIntrospection) -> MemorySample {
        let primary = heap.heap_stats(MemoryRegion::Primary);
        let auxiliary = heap.heap_stats(MemoryRegion::Auxiliary);

        if !self.auxiliary_seen && auxiliary.total_bytes() > 0 {
            info!(
                total_bytes = auxiliary.total_bytes(),
                "Auxiliary memory region detected"
            );
            self.auxiliary_seen = true;
        }

        MemorySample::builder()
            .primary(primary)
            .auxiliary(self.auxiliary_seen.then_some(auxiliary))
            .build()
    }

    pub fn auxiliary_seen(&self) -> bool {
        self.auxiliary_seen
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;
    use crate::metric::HeapStats;
    use crate::platform::sim::SimulatedRtos;

    fn dram() -> HeapStats {
        HeapStats::builder()
            .free_bytes(120_000)
            .min_free_bytes(90_000)
            .largest_free_block(64_000)
            .total_bytes(300_000)
            .build()
    }

    #[test]
    fn absent_auxiliary_region_is_not_reported() {
        let rtos = SimulatedRtos::new(2);
        rtos.set_heap(MemoryRegion::Primary, dram());

        let mut collector = MemoryStatsCollector::new();
        let sample = collector.collect(&rtos);

        assert_eq!(sample.primary(), dram());
        assert_eq!(sample.primary().used_percent(), 60.0);
        assert_eq!(sample.auxiliary(), None);
        assert!(!collector.auxiliary_seen());
    }

    #[test]
    fn auxiliary_presence_is_sticky() {
        let rtos = SimulatedRtos::new(2);
        rtos.set_heap(MemoryRegion::Primary, dram());
        rtos.set_heap(
            MemoryRegion::Auxiliary,
            HeapStats::builder()
                .free_bytes(1_000_000)
                .total_bytes(4_000_000)
                .build(),
        );

        let mut collector = MemoryStatsCollector::new();
        let sample = collector.collect(&rtos);
        assert_eq!(sample.auxiliary().map(|stats| stats.used_percent()), Some(75.0));

        rtos.set_heap(MemoryRegion::Auxiliary, HeapStats::default());
        let sample = collector.collect(&rtos);
        assert!(collector.auxiliary_seen());
        assert_eq!(sample.auxiliary(), Some(HeapStats::default()));
    }
}
