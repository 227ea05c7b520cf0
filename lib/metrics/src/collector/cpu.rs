use crate::metric::CpuLoad;
use crate::platform::TaskStatus;
use common::TaskHandle;
use tracing::trace;

/// Difference between two readings of a free-running 32-bit counter.
///
/// A reading lower than the previous one means the counter wrapped exactly once, so the
/// result is always the forward distance on the counter's cycle.
#[inline]
pub fn counter_delta(previous: u32, current: u32) -> u32 {
    if current >= previous {
        current - previous
    } else {
        (u32::MAX - previous) + current + 1
    }
}

/// Share of `delta_total` spent in a task, as a percentage in `[0, 100]`. `0.0` when no
/// time elapsed.
#[inline]
pub fn task_usage_percent(delta_task: u32, delta_total: u32) -> f32 {
    if delta_total == 0 {
        return 0.0;
    }
    (delta_task as f64 * 100.0 / delta_total as f64).min(100.0) as f32
}

/// Runtime counters of each core's idle task, in core order. `None` when the idle task of
/// a core is missing from the snapshot.
pub fn idle_counters(
    snapshot: &[TaskStatus],
    idle_tasks: &[Option<TaskHandle>],
) -> Vec<Option<u32>> {
    idle_tasks
        .iter()
        .map(|idle| {
            idle.and_then(|handle| {
                snapshot
                    .iter()
                    .find(|status| status.handle() == handle)
                    .map(TaskStatus::run_time_counter)
            })
        })
        .collect()
}

/// Turns successive total and idle runtime readings into utilisation figures.
///
/// Holds the previous total counter and one previous idle counter per core. Neither ever
/// needs resetting to stay correct across a counter wrap.
#[derive(Debug, Clone, Default)]
pub struct CpuLoadCalculator {
    previous_total: u32,
    previous_idle: Vec<u32>,
}

impl CpuLoadCalculator {
    pub fn new(cores: usize) -> Self {
        Self {
            previous_total: 0,
            previous_idle: vec![0; cores],
        }
    }

    pub fn cores(&self) -> usize {
        self.previous_idle.len()
    }

    /// Records a new total runtime reading and returns the time elapsed since the last one.
    pub fn total_delta(&mut self, total_run_time: u32) -> u32 {
        let delta = counter_delta(self.previous_total, total_run_time);
        self.previous_total = total_run_time;
        delta
    }

    /// Per-core load is the complement of the idle task's share of the elapsed time,
    /// clamped to `[0, 100]`. A core whose idle task was not found reads `0.0` and keeps
    /// its previous idle counter.
    pub fn core_load(&mut self, idle: &[Option<u32>], delta_total: u32) -> CpuLoad {
        let cores = self
            .previous_idle
            .iter_mut()
            .enumerate()
            .map(|(core, previous)| {
                let Some(current) = idle.get(core).copied().flatten() else {
                    trace!(core, "Idle task not found in snapshot");
                    return 0.0;
                };
                let delta_idle = counter_delta(*previous, current);
                *previous = current;

                if delta_total == 0 {
                    return 0.0;
                }
                (100.0 - task_usage_percent(delta_idle, delta_total)).clamp(0.0, 100.0)
            })
            .collect();

        CpuLoad::new(cores)
    }

    /// Forgets the previous total reading.
    pub fn reset_total(&mut self) {
        self.previous_total = 0;
    }
}
