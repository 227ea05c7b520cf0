//! Per-tick derivations: CPU utilisation from runtime counters, heap statistics from the
//! allocator, and stack usage from high-water-marks.

pub mod cpu;
pub mod memory;
pub mod stack;

pub use cpu::{counter_delta, task_usage_percent, CpuLoadCalculator};
pub use memory::MemoryStatsCollector;
pub use stack::StackUsage;
