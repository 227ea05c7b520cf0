use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

/// Memory regions the heap introspection facility can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRegion {
    /// Internal RAM (DRAM). Always present.
    Primary,
    /// External RAM (e.g. PSRAM). Absent on many boards, reported with a total of zero.
    Auxiliary,
}

/// Point-in-time statistics of one heap region, in bytes.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    CopyGetters,
    TypedBuilder,
)]
#[getset(get_copy = "pub")]
pub struct HeapStats {
    #[builder(default)]
    free_bytes: u64,
    /// Lowest free size ever observed. Never increases for the life of the process.
    #[builder(default)]
    min_free_bytes: u64,
    #[builder(default)]
    largest_free_block: u64,
    #[builder(default)]
    total_bytes: u64,
}

impl HeapStats {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Percentage of the region in use, `0.0` for an empty (absent) region.
    pub fn used_percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes() as f64 * 100.0 / self.total_bytes as f64) as f32
    }
}

/// Heap statistics of one tick. `auxiliary` is `None` until the auxiliary region has
/// been observed at least once.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, CopyGetters, TypedBuilder)]
#[getset(get_copy = "pub")]
pub struct MemorySample {
    primary: HeapStats,
    #[builder(default)]
    auxiliary: Option<HeapStats>,
}

impl MemorySample {
    pub fn log_metric(&self) {
        debug!(
            "DRAM - Free: {} bytes, Min free: {} bytes, Largest block: {} bytes, Used: {:.1}%",
            self.primary.free_bytes,
            self.primary.min_free_bytes,
            self.primary.largest_free_block,
            self.primary.used_percent()
        );
        if let Some(auxiliary) = self.auxiliary {
            debug!(
                "Auxiliary RAM - Free: {} bytes, Total: {} bytes, Used: {:.1}%",
                auxiliary.free_bytes,
                auxiliary.total_bytes,
                auxiliary.used_percent()
            );
        }
    }
}

/// CPU utilisation of one tick: one percentage per core and their mean.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CpuLoad {
    cores: Vec<f32>,
    overall: f32,
}

impl CpuLoad {
    pub fn new(cores: Vec<f32>) -> Self {
        let overall = if cores.is_empty() {
            0.0
        } else {
            cores.iter().sum::<f32>() / cores.len() as f32
        };
        Self { cores, overall }
    }

    pub fn cores(&self) -> &[f32] {
        &self.cores
    }

    pub fn overall(&self) -> f32 {
        self.overall
    }

    pub fn log_metric(&self) {
        debug!(
            "CPU Usage: {:.1}% (per core: {:?})",
            self.overall, self.cores
        );
    }
}
