//! One sampling tick, start to finish.

use crate::collector::{cpu::idle_counters, CpuLoadCalculator, MemoryStatsCollector};
use crate::platform::Platform;
use crate::registry::TaskRegistry;
use crate::series::SystemSeries;
use common::SysmonConfig;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

/// "Sampling N tasks" is logged on every this many sampled ticks.
const SAMPLING_LOG_PERIOD: u64 = 10;

/// Why a tick wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The slot table could not be grown. Retried on the next tick.
    CapacityUnavailable,
    /// The scheduler returned no tasks.
    EmptySnapshot,
    /// The global runtime counter did not move since the previous tick.
    NoElapsedTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sampled { tasks: usize, dropped: usize },
    Skipped(SkipReason),
}

/// Everything the sampler writes. Owned by a single writer; readers only ever see it
/// through a shared lock.
#[derive(Debug)]
pub struct SamplerState {
    registry: TaskRegistry,
    cpu: CpuLoadCalculator,
    memory: MemoryStatsCollector,
    series: SystemSeries,
    ticks_sampled: u64,
    ticks_skipped: u64,
    stack_word_size: u32,
}

impl SamplerState {
    pub fn new(config: &SysmonConfig, cores: usize) -> Self {
        Self {
            registry: TaskRegistry::new(config.sample_count(), config.max_tracked_tasks()),
            cpu: CpuLoadCalculator::new(cores),
            memory: MemoryStatsCollector::new(),
            series: SystemSeries::new(config.sample_count(), cores),
            ticks_sampled: 0,
            ticks_skipped: 0,
            stack_word_size: config.stack_word_size(),
        }
    }

    #[instrument(skip_all)]
    pub fn tick(&mut self, platform: &Platform) -> TickOutcome {
        let outcome = self.sample(platform);
        match outcome {
            TickOutcome::Sampled { .. } => self.ticks_sampled += 1,
            TickOutcome::Skipped(reason) => {
                debug!(?reason, "Skipping sampling tick");
                self.ticks_skipped += 1;
            }
        }
        outcome
    }

    fn sample(&mut self, platform: &Platform) -> TickOutcome {
        let tasks = platform.tasks().as_ref();

        if let Err(error) = self.registry.ensure_capacity(tasks) {
            warn!(%error, "Task slot table unavailable, will retry next sample");
            return TickOutcome::Skipped(SkipReason::CapacityUnavailable);
        }

        let total_run_time = self.registry.snapshot(tasks);
        let returned = self.registry.scratch().len();
        if returned == 0 {
            return TickOutcome::Skipped(SkipReason::EmptySnapshot);
        }

        let delta_total = self.cpu.total_delta(total_run_time);
        if delta_total == 0 {
            return TickOutcome::Skipped(SkipReason::NoElapsedTime);
        }

        if self.ticks_sampled % SAMPLING_LOG_PERIOD == 0 {
            info!("Sampling {} tasks", returned);
        }

        let observation =
            self.registry
                .observe(delta_total, platform.stacks().as_ref(), self.stack_word_size);
        let evicted = self.registry.reconcile_unseen();
        trace!(?observation, evicted, "Task slots updated");

        let idle_tasks: Vec<_> = (0..self.cpu.cores()).map(|core| tasks.idle_task(core)).collect();
        let cpu = self
            .cpu
            .core_load(&idle_counters(self.registry.scratch(), &idle_tasks), delta_total);
        cpu.log_metric();

        let memory = self.memory.collect(platform.heap().as_ref());
        memory.log_metric();

        self.series.record(&cpu, &memory);

        TickOutcome::Sampled {
            tasks: observation.tracked,
            dropped: observation.dropped,
        }
    }

    /// Drops the slot table and forgets the previous runtime reading. System history and
    /// tick counters are kept.
    pub fn release(&mut self) {
        self.registry.clear();
        self.cpu.reset_total();
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn series(&self) -> &SystemSeries {
        &self.series
    }

    pub fn ticks_sampled(&self) -> u64 {
        self.ticks_sampled
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped
    }
}
