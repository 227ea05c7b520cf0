//! Read-only views of the sampler's state.
//!
//! Every view is copied out under a short read lock, so a reader never holds the lock
//! across an await point or a serialization pass.

use crate::manager::LifecycleState;
use crate::registry::TaskSlot;
use crate::sampler::SamplerState;
use common::TaskName;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// State shared between the sampling task (sole writer) and every reader.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) sampler: RwLock<SamplerState>,
    pub(crate) lifecycle: RwLock<LifecycleState>,
}

impl SharedState {
    pub(crate) fn new(sampler: SamplerState) -> Self {
        Self {
            sampler: RwLock::new(sampler),
            lifecycle: RwLock::new(LifecycleState::Stopped),
        }
    }
}

/// Current figures of one tracked task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub name: TaskName,
    pub task_id: u32,
    pub current_priority: u32,
    pub base_priority: u32,
    pub core_id: Option<u32>,
    /// `None` when no stack size was registered for the task.
    pub stack_size_bytes: Option<u32>,
    pub stack_used_bytes: u32,
    /// `None` when no stack size was registered for the task.
    pub stack_used_percent: Option<f32>,
    pub stack_high_water_mark_bytes: u32,
    pub cpu_percent: f32,
    pub run_time_counter: u32,
    pub consecutive_absence: usize,
}

impl From<&TaskSlot> for TaskSnapshot {
    fn from(slot: &TaskSlot) -> Self {
        let stack = slot.stack();
        let registered = stack.is_registered();
        Self {
            name: slot.name().clone(),
            task_id: slot.task_id(),
            current_priority: slot.current_priority(),
            base_priority: slot.base_priority(),
            core_id: slot.core_id(),
            stack_size_bytes: registered.then_some(stack.size_bytes()),
            stack_used_bytes: stack.used_bytes(),
            stack_used_percent: registered.then_some(stack.used_percent()),
            stack_high_water_mark_bytes: stack.high_water_mark_bytes(),
            cpu_percent: slot.latest_cpu_percent(),
            run_time_counter: slot.run_time_counter(),
            consecutive_absence: slot.consecutive_absence(),
        }
    }
}

/// History of one task, oldest sample first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskHistory {
    pub name: TaskName,
    pub cpu_percent: Vec<f32>,
    pub stack_used_bytes: Vec<u32>,
    pub stack_used_percent: Vec<f32>,
}

impl From<&TaskSlot> for TaskHistory {
    fn from(slot: &TaskSlot) -> Self {
        let cursor = slot.cursor();
        Self {
            name: slot.name().clone(),
            cpu_percent: slot.cpu_percent().chronological(&cursor),
            stack_used_bytes: slot.stack_used_bytes().chronological(&cursor),
            stack_used_percent: slot.stack_used_percent().chronological(&cursor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DramHistory {
    pub free: Vec<u64>,
    pub min_free: Vec<u64>,
    pub largest_free_block: Vec<u64>,
    pub total: Vec<u64>,
    pub used_percent: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuxiliaryHistory {
    pub free: Vec<u64>,
    pub total: Vec<u64>,
    pub used_percent: Vec<f32>,
}

/// System-wide history, oldest sample first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHistory {
    pub depth: usize,
    pub samples_recorded: u64,
    pub cpu_overall: Vec<f32>,
    /// One series per core, in core order.
    pub cpu_cores: Vec<Vec<f32>>,
    pub dram: DramHistory,
    /// `None` until the auxiliary region has been observed.
    pub auxiliary: Option<AuxiliaryHistory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DramSnapshot {
    pub free_bytes: u64,
    pub min_free_bytes: u64,
    pub largest_free_block: u64,
    pub total_bytes: u64,
    pub used_percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AuxiliarySnapshot {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub used_percent: f32,
}

/// Latest value of every system-wide series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub samples_recorded: u64,
    pub cpu_overall: f32,
    pub cpu_cores: Vec<f32>,
    pub dram: DramSnapshot,
    pub auxiliary: Option<AuxiliarySnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SysmonStatus {
    pub state: LifecycleState,
    pub capacity: usize,
    pub max_tasks: usize,
    pub depth: usize,
    pub active_tasks: usize,
    pub ticks_sampled: u64,
    pub ticks_skipped: u64,
    pub samples_recorded: u64,
}

/// Cloneable read-only handle on a running (or stopped) sampler.
#[derive(Debug, Clone)]
pub struct SysmonReader {
    shared: Arc<SharedState>,
}

impl SysmonReader {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Current figures of every active task, in slot order.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let sampler = self.shared.sampler.read();
        sampler
            .registry()
            .active_slots()
            .map(TaskSnapshot::from)
            .collect()
    }

    pub fn task_history(&self, name: &str) -> Option<TaskHistory> {
        let sampler = self.shared.sampler.read();
        sampler.registry().find_active(name).map(TaskHistory::from)
    }

    pub fn task_histories(&self) -> Vec<TaskHistory> {
        let sampler = self.shared.sampler.read();
        sampler
            .registry()
            .active_slots()
            .map(TaskHistory::from)
            .collect()
    }

    pub fn system_history(&self) -> SystemHistory {
        let sampler = self.shared.sampler.read();
        let series = sampler.series();
        let cursor = series.cursor();
        let dram = series.dram();
        let auxiliary = series.auxiliary();

        SystemHistory {
            depth: cursor.depth(),
            samples_recorded: series.samples_recorded(),
            cpu_overall: series.cpu_overall().chronological(cursor),
            cpu_cores: series
                .cpu_cores()
                .iter()
                .map(|core| core.chronological(cursor))
                .collect(),
            dram: DramHistory {
                free: dram.free.chronological(cursor),
                min_free: dram.min_free.chronological(cursor),
                largest_free_block: dram.largest_free_block.chronological(cursor),
                total: dram.total.chronological(cursor),
                used_percent: dram.used_percent.chronological(cursor),
            },
            auxiliary: series.auxiliary_seen().then(|| AuxiliaryHistory {
                free: auxiliary.free.chronological(cursor),
                total: auxiliary.total.chronological(cursor),
                used_percent: auxiliary.used_percent.chronological(cursor),
            }),
        }
    }

    pub fn system_current(&self) -> SystemSnapshot {
        let sampler = self.shared.sampler.read();
        let series = sampler.series();
        let cursor = series.cursor();
        let dram = series.dram();
        let auxiliary = series.auxiliary();

        SystemSnapshot {
            samples_recorded: series.samples_recorded(),
            cpu_overall: series.cpu_overall().latest(cursor),
            cpu_cores: series
                .cpu_cores()
                .iter()
                .map(|core| core.latest(cursor))
                .collect(),
            dram: DramSnapshot {
                free_bytes: dram.free.latest(cursor),
                min_free_bytes: dram.min_free.latest(cursor),
                largest_free_block: dram.largest_free_block.latest(cursor),
                total_bytes: dram.total.latest(cursor),
                used_percent: dram.used_percent.latest(cursor),
            },
            auxiliary: series.auxiliary_seen().then(|| AuxiliarySnapshot {
                free_bytes: auxiliary.free.latest(cursor),
                total_bytes: auxiliary.total.latest(cursor),
                used_percent: auxiliary.used_percent.latest(cursor),
            }),
        }
    }

    pub fn status(&self) -> SysmonStatus {
        let state = *self.shared.lifecycle.read();
        let sampler = self.shared.sampler.read();
        let registry = sampler.registry();

        SysmonStatus {
            state,
            capacity: registry.capacity(),
            max_tasks: registry.max_tasks(),
            depth: registry.depth(),
            active_tasks: registry.active_count(),
            ticks_sampled: sampler.ticks_sampled(),
            ticks_skipped: sampler.ticks_skipped(),
            samples_recorded: sampler.series().samples_recorded(),
        }
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;
    use crate::metric::{HeapStats, MemoryRegion};
    use crate::platform::sim::{simulated_platform, task, SimulatedRtos};
    use common::{SysmonConfig, TaskHandle};
    use pretty_assertions_sorted::assert_eq;

    fn sampled_reader() -> SysmonReader {
        let rtos = Arc::new(SimulatedRtos::new(1));
        let platform = simulated_platform(rtos.clone());
        platform.stacks().register(TaskHandle(1), 2048);
        rtos.set_idle_task(0, TaskHandle(100));
        rtos.set_heap(
            MemoryRegion::Primary,
            HeapStats::builder().free_bytes(500).total_bytes(1000).build(),
        );

        let config = SysmonConfig::builder().sample_count(3).build();
        let mut sampler = SamplerState::new(&config, 1);

        rtos.set_tasks(vec![task(1, "worker", 0), task(100, "IDLE", 0)]);
        rtos.set_total_run_time(100);
        sampler.tick(&platform);
        rtos.set_tasks(vec![task(1, "worker", 40), task(100, "IDLE", 60)]);
        rtos.set_total_run_time(200);
        sampler.tick(&platform);

        SysmonReader::new(Arc::new(SharedState::new(sampler)))
    }

    #[test]
    fn tasks_reflect_the_latest_tick() {
        let reader = sampled_reader();
        let tasks = reader.tasks();

        assert_eq!(tasks.len(), 2);
        let worker = &tasks[0];
        assert_eq!(worker.name.as_str(), "worker");
        assert_eq!(worker.cpu_percent, 40.0);
        assert_eq!(worker.stack_size_bytes, Some(2048));
        assert_eq!(worker.stack_used_bytes, 2048);

        let idle = &tasks[1];
        assert_eq!(idle.stack_size_bytes, None);
        assert_eq!(idle.stack_used_percent, None);
    }

    #[test]
    fn histories_are_oldest_first() {
        let reader = sampled_reader();

        let worker = reader.task_history("worker").unwrap();
        assert_eq!(worker.cpu_percent, vec![0.0, 0.0, 40.0]);
        assert!(reader.task_history("nobody").is_none());
        assert_eq!(reader.task_histories().len(), 2);

        let system = reader.system_history();
        assert_eq!(system.depth, 3);
        assert_eq!(system.samples_recorded, 2);
        assert_eq!(system.cpu_cores[0], vec![0.0, 100.0, 40.0]);
        assert_eq!(system.dram.used_percent, vec![0.0, 50.0, 50.0]);
        assert!(system.auxiliary.is_none());
    }

    #[test]
    fn current_system_values_and_status() {
        let reader = sampled_reader();

        let current = reader.system_current();
        assert_eq!(current.cpu_overall, 40.0);
        assert_eq!(current.dram.free_bytes, 500);
        assert!(current.auxiliary.is_none());

        let status = reader.status();
        assert_eq!(status.state, LifecycleState::Stopped);
        assert_eq!(status.active_tasks, 2);
        assert_eq!(status.ticks_sampled, 2);
        assert_eq!(status.ticks_skipped, 0);
    }

    #[test]
    fn views_serialize_to_json() {
        let reader = sampled_reader();
        let json = serde_json::to_value(reader.tasks()).unwrap();
        assert_eq!(json[0]["name"].as_str(), Some("worker"));

        let json = serde_json::to_value(reader.status()).unwrap();
        assert_eq!(json["state"].as_str(), Some("stopped"));
    }
}
