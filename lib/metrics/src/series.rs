//! Fixed-depth circular history buffers.
//!
//! A [`Series`] only stores samples; where the next sample goes is decided by a
//! [`SeriesCursor`]. Series that must advance in lock-step (the three series of a task
//! slot, or every system-wide series) share one cursor, so they can never drift apart.

use crate::metric::{CpuLoad, MemorySample};
use serde::Serialize;
use std::collections::TryReserveError;

/// Write position shared by a group of series of the same depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeriesCursor {
    position: usize,
    depth: usize,
}

impl SeriesCursor {
    pub fn new(depth: usize) -> Self {
        Self {
            position: 0,
            depth: depth.max(1),
        }
    }

    /// Index the next sample is written to. Always in `[0, depth)`.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Index of the most recently written sample.
    pub fn latest(&self) -> usize {
        (self.position + self.depth - 1) % self.depth
    }

    pub fn advance(&mut self) {
        self.position = (self.position + 1) % self.depth;
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series<T> {
    samples: Vec<T>,
}

impl<T: Copy + Default> Series<T> {
    pub fn new(depth: usize) -> Self {
        Self {
            samples: vec![T::default(); depth.max(1)],
        }
    }

    /// Fallible variant of [`Series::new`], used where allocation failure must be survivable.
    pub fn try_new(depth: usize) -> Result<Self, TryReserveError> {
        let depth = depth.max(1);
        let mut samples = Vec::new();
        samples.try_reserve_exact(depth)?;
        samples.resize(depth, T::default());
        Ok(Self { samples })
    }

    pub fn record(&mut self, cursor: &SeriesCursor, value: T) {
        self.samples[cursor.position()] = value;
    }

    pub fn latest(&self, cursor: &SeriesCursor) -> T {
        self.samples[cursor.latest()]
    }

    /// Samples ordered oldest first, newest last.
    pub fn chronological(&self, cursor: &SeriesCursor) -> Vec<T> {
        let (newer, older) = self.samples.split_at(cursor.position());
        older.iter().chain(newer).copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.fill(T::default());
    }

    pub fn as_slice(&self) -> &[T] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Primary memory region series.
#[derive(Debug, Clone)]
pub struct DramSeries {
    pub free: Series<u64>,
    pub min_free: Series<u64>,
    pub largest_free_block: Series<u64>,
    pub total: Series<u64>,
    pub used_percent: Series<f32>,
}

impl DramSeries {
    fn new(depth: usize) -> Self {
        Self {
            free: Series::new(depth),
            min_free: Series::new(depth),
            largest_free_block: Series::new(depth),
            total: Series::new(depth),
            used_percent: Series::new(depth),
        }
    }
}

/// Auxiliary memory region series. Zero-filled for as long as the region has not been seen.
#[derive(Debug, Clone)]
pub struct AuxiliarySeries {
    pub free: Series<u64>,
    pub total: Series<u64>,
    pub used_percent: Series<f32>,
}

impl AuxiliarySeries {
    fn new(depth: usize) -> Self {
        Self {
            free: Series::new(depth),
            total: Series::new(depth),
            used_percent: Series::new(depth),
        }
    }
}

/// System-wide CPU and memory history. Every series is written at the same cursor, which
/// advances once per recorded tick.
#[derive(Debug, Clone)]
pub struct SystemSeries {
    cursor: SeriesCursor,
    samples_recorded: u64,
    auxiliary_seen: bool,
    cpu_overall: Series<f32>,
    cpu_cores: Vec<Series<f32>>,
    dram: DramSeries,
    auxiliary: AuxiliarySeries,
}

impl SystemSeries {
    pub fn new(depth: usize, cores: usize) -> Self {
        Self {
            cursor: SeriesCursor::new(depth),
            samples_recorded: 0,
            auxiliary_seen: false,
            cpu_overall: Series::new(depth),
            cpu_cores: (0..cores).map(|_| Series::new(depth)).collect(),
            dram: DramSeries::new(depth),
            auxiliary: AuxiliarySeries::new(depth),
        }
    }

    pub fn record(&mut self, cpu: &CpuLoad, memory: &MemorySample) {
        let cursor = self.cursor;

        self.cpu_overall.record(&cursor, cpu.overall());
        for (core, series) in self.cpu_cores.iter_mut().enumerate() {
            series.record(&cursor, cpu.cores().get(core).copied().unwrap_or_default());
        }

        let dram = memory.primary();
        self.dram.free.record(&cursor, dram.free_bytes());
        self.dram.min_free.record(&cursor, dram.min_free_bytes());
        self.dram
            .largest_free_block
            .record(&cursor, dram.largest_free_block());
        self.dram.total.record(&cursor, dram.total_bytes());
        self.dram.used_percent.record(&cursor, dram.used_percent());

        let auxiliary = memory.auxiliary().unwrap_or_default();
        self.auxiliary_seen |= memory.auxiliary().is_some();
        self.auxiliary.free.record(&cursor, auxiliary.free_bytes());
        self.auxiliary.total.record(&cursor, auxiliary.total_bytes());
        self.auxiliary
            .used_percent
            .record(&cursor, auxiliary.used_percent());

        self.cursor.advance();
        self.samples_recorded += 1;
    }

    pub fn cursor(&self) -> &SeriesCursor {
        &self.cursor
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples_recorded
    }

    pub fn auxiliary_seen(&self) -> bool {
        self.auxiliary_seen
    }

    pub fn cpu_overall(&self) -> &Series<f32> {
        &self.cpu_overall
    }

    pub fn cpu_cores(&self) -> &[Series<f32>] {
        &self.cpu_cores
    }

    pub fn dram(&self) -> &DramSeries {
        &self.dram
    }

    pub fn auxiliary(&self) -> &AuxiliarySeries {
        &self.auxiliary
    }
}

#[cfg(test)]
mod series_tests {
    use super::*;
    use crate::metric::HeapStats;

    #[test]
    fn cursor_stays_in_range_and_wraps_every_depth_writes() {
        let depth = 5;
        let mut cursor = SeriesCursor::new(depth);

        for write in 1..=(depth * 3) {
            cursor.advance();
            assert!(cursor.position() < depth);
            assert_eq!(cursor.position(), write % depth);
        }
    }

    #[test]
    fn zero_depth_is_treated_as_one() {
        let mut cursor = SeriesCursor::new(0);
        assert_eq!(cursor.depth(), 1);
        cursor.advance();
        assert_eq!(cursor.position(), 0);
        assert_eq!(Series::<u32>::new(0).len(), 1);
    }

    #[test]
    fn chronological_returns_oldest_first() {
        let mut cursor = SeriesCursor::new(4);
        let mut series = Series::<u32>::new(4);

        for value in 1..=6 {
            series.record(&cursor, value);
            cursor.advance();
        }

        assert_eq!(series.as_slice(), &[5, 6, 3, 4]);
        assert_eq!(series.chronological(&cursor), vec![3, 4, 5, 6]);
        assert_eq!(series.latest(&cursor), 6);
    }

    #[test]
    fn chronological_before_wrap_is_zero_padded_at_the_front() {
        let mut cursor = SeriesCursor::new(4);
        let mut series = Series::<u32>::new(4);

        series.record(&cursor, 7);
        cursor.advance();

        assert_eq!(series.chronological(&cursor), vec![0, 0, 0, 7]);
    }

    #[test]
    fn system_series_advance_in_lock_step() {
        let mut series = SystemSeries::new(3, 2);
        let cpu = CpuLoad::new(vec![50.0, 80.0]);
        let memory = MemorySample::builder()
            .primary(
                HeapStats::builder()
                    .free_bytes(600)
                    .min_free_bytes(400)
                    .largest_free_block(300)
                    .total_bytes(1000)
                    .build(),
            )
            .auxiliary(None)
            .build();

        for _ in 0..4 {
            series.record(&cpu, &memory);
        }

        let cursor = *series.cursor();
        assert_eq!(cursor.position(), 1);
        assert_eq!(series.samples_recorded(), 4);
        assert_eq!(series.cpu_overall().latest(&cursor), 65.0);
        assert_eq!(series.cpu_cores()[1].latest(&cursor), 80.0);
        assert_eq!(series.dram().used_percent.latest(&cursor), 40.0);
        assert_eq!(series.dram().min_free.latest(&cursor), 400);
        assert!(!series.auxiliary_seen());
        assert_eq!(series.auxiliary().total.latest(&cursor), 0);
    }
}
