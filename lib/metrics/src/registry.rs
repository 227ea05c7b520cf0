//! Per-task slot table.
//!
//! Tasks are identified by name. Each distinct name gets a [`TaskSlot`] holding its
//! metadata and three fixed-depth history series. Slots are never freed during a run:
//! a task that disappears is written zeros until it has been absent for a full history
//! depth, then its slot goes inactive and may be handed to the next new task.
//!
//! Two tasks that share a name at the same time share one slot, and that slot records
//! twice in the same tick.

use crate::collector::{counter_delta, task_usage_percent, StackUsage};
use crate::platform::{StackRegistry, TaskIntrospection, TaskStatus};
use crate::series::{Series, SeriesCursor};
use common::{TaskHandle, TaskName};
use getset::{CopyGetters, Getters};
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Absence progress is logged on every multiple of this many consecutive absences.
const ABSENCE_LOG_PERIOD: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Failed to allocate storage for {requested} task slots")]
    AllocationFailed { requested: usize },
}

#[derive(Debug, Clone, CopyGetters, Getters)]
pub struct TaskSlot {
    #[getset(get = "pub")]
    name: TaskName,
    /// Scheduler handle of the task seen at the latest observation.
    #[getset(get_copy = "pub")]
    handle: TaskHandle,
    #[getset(get_copy = "pub")]
    active: bool,
    #[getset(get_copy = "pub")]
    task_id: u32,
    #[getset(get_copy = "pub")]
    current_priority: u32,
    #[getset(get_copy = "pub")]
    base_priority: u32,
    #[getset(get_copy = "pub")]
    core_id: Option<u32>,
    /// Runtime counter at the latest observation.
    #[getset(get_copy = "pub")]
    run_time_counter: u32,
    /// Runtime counter at the observation before the latest one.
    #[getset(get_copy = "pub")]
    previous_run_time_counter: u32,
    has_baseline: bool,
    #[getset(get_copy = "pub")]
    consecutive_absence: usize,
    #[getset(get_copy = "pub")]
    stack: StackUsage,
    #[getset(get_copy = "pub")]
    cursor: SeriesCursor,
    #[getset(get = "pub")]
    cpu_percent: Series<f32>,
    #[getset(get = "pub")]
    stack_used_bytes: Series<u32>,
    #[getset(get = "pub")]
    stack_used_percent: Series<f32>,
}

impl TaskSlot {
    pub fn try_new(depth: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            name: TaskName::default(),
            handle: TaskHandle::default(),
            active: false,
            task_id: 0,
            current_priority: 0,
            base_priority: 0,
            core_id: None,
            run_time_counter: 0,
            previous_run_time_counter: 0,
            has_baseline: false,
            consecutive_absence: 0,
            stack: StackUsage::default(),
            cursor: SeriesCursor::new(depth),
            cpu_percent: Series::try_new(depth)?,
            stack_used_bytes: Series::try_new(depth)?,
            stack_used_percent: Series::try_new(depth)?,
        })
    }

    /// Wipes every field and claims the slot for `name`. Series storage is reused.
    fn activate(&mut self, name: &TaskName) {
        self.name = name.clone();
        self.handle = TaskHandle::default();
        self.active = true;
        self.task_id = 0;
        self.current_priority = 0;
        self.base_priority = 0;
        self.core_id = None;
        self.run_time_counter = 0;
        self.previous_run_time_counter = 0;
        self.has_baseline = false;
        self.consecutive_absence = 0;
        self.stack = StackUsage::default();
        self.cursor.reset();
        self.cpu_percent.clear();
        self.stack_used_bytes.clear();
        self.stack_used_percent.clear();
    }

    /// Records one observation of the task.
    ///
    /// The first observation after activation only seeds the runtime baseline and records
    /// zero CPU, since there is no earlier reading to diff against. A different handle under
    /// the same name is a new task, so its counter starts a new baseline too.
    fn record_presence(&mut self, status: &TaskStatus, delta_total: u32, stack: StackUsage) {
        if self.has_baseline && self.handle != status.handle() {
            debug!(
                task = %self.name,
                previous = %self.handle,
                current = %status.handle(),
                "Task handle changed, reseeding runtime baseline"
            );
            self.has_baseline = false;
        }
        self.handle = status.handle();

        let current = status.run_time_counter();
        let delta_task = if self.has_baseline {
            counter_delta(self.run_time_counter, current)
        } else {
            0
        };
        self.previous_run_time_counter = if self.has_baseline {
            self.run_time_counter
        } else {
            current
        };
        self.run_time_counter = current;
        self.has_baseline = true;
        self.consecutive_absence = 0;

        self.task_id = status.task_number();
        self.current_priority = status.current_priority();
        self.base_priority = status.base_priority();
        self.core_id = status.core_id();
        self.stack = stack;

        self.push(
            task_usage_percent(delta_task, delta_total),
            stack.used_bytes(),
            stack.used_percent(),
        );
    }

    /// Records a tick in which the task was not seen. Returns `true` when this absence
    /// made the slot inactive.
    fn record_absence(&mut self, depth: usize) -> bool {
        self.consecutive_absence += 1;
        self.push(0.0, 0, 0.0);

        if self.consecutive_absence >= depth {
            info!(
                task = %self.name,
                depth,
                "Task removed after {} consecutive absent samples", depth
            );
            self.active = false;
            self.consecutive_absence = 0;
            return true;
        }

        if self.consecutive_absence % ABSENCE_LOG_PERIOD == 0 {
            info!(
                task = %self.name,
                "Task not detected, recording zero (absence {} of {})",
                self.consecutive_absence,
                depth
            );
        }
        false
    }

    fn push(&mut self, cpu_percent: f32, stack_used_bytes: u32, stack_used_percent: f32) {
        let cursor = self.cursor;
        self.cpu_percent.record(&cursor, cpu_percent);
        self.stack_used_bytes.record(&cursor, stack_used_bytes);
        self.stack_used_percent.record(&cursor, stack_used_percent);
        self.cursor.advance();
    }

    /// CPU percentage of the most recent sample.
    pub fn latest_cpu_percent(&self) -> f32 {
        self.cpu_percent.latest(&self.cursor)
    }
}

/// Result of matching one snapshot against the slot table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Snapshot records written to a slot.
    pub tracked: usize,
    /// Named records that found no free slot.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct TaskRegistry {
    slots: Vec<TaskSlot>,
    /// Raw records of the latest snapshot. Never larger than the slot table.
    scratch: Vec<TaskStatus>,
    seen: Vec<bool>,
    depth: usize,
    max_tasks: usize,
}

impl TaskRegistry {
    /// An empty registry. Storage is sized on the first [`TaskRegistry::ensure_capacity`].
    pub fn new(depth: usize, max_tasks: usize) -> Self {
        Self {
            slots: Vec::new(),
            scratch: Vec::new(),
            seen: Vec::new(),
            depth: depth.max(1),
            max_tasks,
        }
    }

    /// A registry with `capacity` slots already allocated (capped at `max_tasks`).
    pub fn with_capacity(
        depth: usize,
        max_tasks: usize,
        capacity: usize,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new(depth, max_tasks);
        registry.grow(capacity.min(max_tasks))?;
        Ok(registry)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Capacity needed for `count` tasks: 50% headroom when the last snapshot filled the
    /// buffer (more tasks may exist than were returned), 20% otherwise, at least one slot,
    /// never above `max_tasks`.
    pub fn required_capacity(count: usize, saturated: bool, max_tasks: usize) -> usize {
        let growth_percent = if saturated { 50 } else { 20 };
        let headroom = (count * growth_percent / 100).max(1);
        (count + headroom).min(max_tasks)
    }

    /// Makes sure the slot table can hold every task the scheduler reports.
    ///
    /// On allocation failure the table is left exactly as it was.
    #[instrument(skip_all)]
    pub fn ensure_capacity(&mut self, tasks: &dyn TaskIntrospection) -> Result<(), RegistryError> {
        let capacity = self.capacity();
        let (count, saturated) = if capacity > 0 {
            tasks.system_state(&mut self.scratch, capacity);
            let returned = self.scratch.len();
            if returned < capacity {
                return Ok(());
            }
            (returned, true)
        } else {
            (tasks.task_count(), false)
        };

        let required = Self::required_capacity(count, saturated, self.max_tasks);
        if required <= capacity {
            return Ok(());
        }

        debug!(
            count,
            saturated,
            from = capacity,
            to = required,
            "Growing task slot table"
        );
        self.grow(required)
    }

    fn grow(&mut self, required: usize) -> Result<(), RegistryError> {
        let current = self.capacity();
        if required <= current {
            return Ok(());
        }
        let failed = |_: TryReserveError| RegistryError::AllocationFailed {
            requested: required,
        };

        let mut slots = Vec::new();
        slots.try_reserve_exact(required).map_err(failed)?;
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(required).map_err(failed)?;
        let mut seen = Vec::new();
        seen.try_reserve_exact(required).map_err(failed)?;

        let mut fresh = Vec::new();
        fresh.try_reserve_exact(required - current).map_err(failed)?;
        for _ in current..required {
            fresh.push(TaskSlot::try_new(self.depth).map_err(failed)?);
        }

        slots.append(&mut self.slots);
        slots.append(&mut fresh);
        seen.resize(required, false);

        self.slots = slots;
        self.scratch = scratch;
        self.seen = seen;
        Ok(())
    }

    /// Replaces the scratch buffer with a fresh snapshot and returns the global runtime
    /// counter reported with it.
    pub fn snapshot(&mut self, tasks: &dyn TaskIntrospection) -> u32 {
        let capacity = self.capacity();
        tasks.system_state(&mut self.scratch, capacity)
    }

    pub fn scratch(&self) -> &[TaskStatus] {
        &self.scratch
    }

    /// Writes one sample for every named record of the latest snapshot.
    pub fn observe(
        &mut self,
        delta_total: u32,
        stacks: &dyn StackRegistry,
        stack_word_size: u32,
    ) -> Observation {
        let mut observation = Observation::default();
        self.seen.fill(false);

        for status in &self.scratch {
            let Some(name) = status.name() else {
                continue;
            };
            let Some(index) = find_or_create(&mut self.slots, name) else {
                warn!(
                    task = %name,
                    capacity = self.slots.len(),
                    "Task capacity exceeded, cannot track task. Will retry next sample."
                );
                observation.dropped += 1;
                continue;
            };

            let stack = StackUsage::compute(
                status.stack_high_water_mark(),
                stack_word_size,
                stacks.stack_size(status.handle()),
            );
            self.slots[index].record_presence(status, delta_total, stack);
            self.seen[index] = true;
            observation.tracked += 1;
        }

        observation
    }

    /// Records an absence for every active slot not flagged in `seen`. Returns how many
    /// slots went inactive.
    pub fn reconcile_absent(&mut self, seen: &[bool]) -> usize {
        let depth = self.depth;
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(index, slot)| slot.active && !seen.get(*index).copied().unwrap_or(false))
            .map(|(_, slot)| slot.record_absence(depth))
            .filter(|evicted| *evicted)
            .count()
    }

    /// [`TaskRegistry::reconcile_absent`] against the slots matched by the last
    /// [`TaskRegistry::observe`].
    pub fn reconcile_unseen(&mut self) -> usize {
        let seen = std::mem::take(&mut self.seen);
        let evicted = self.reconcile_absent(&seen);
        self.seen = seen;
        evicted
    }

    pub fn slots(&self) -> &[TaskSlot] {
        &self.slots
    }

    pub fn active_slots(&self) -> impl Iterator<Item = &TaskSlot> {
        self.slots.iter().filter(|slot| slot.active)
    }

    pub fn active_count(&self) -> usize {
        self.active_slots().count()
    }

    pub fn find_active(&self, name: &str) -> Option<&TaskSlot> {
        let name = TaskName::new(name);
        self.active_slots().find(|slot| slot.name == name)
    }

    /// Releases all storage. Capacity drops back to zero.
    pub fn clear(&mut self) {
        self.slots = Vec::new();
        self.scratch = Vec::new();
        self.seen = Vec::new();
    }
}

/// Index of the active slot named `name`, or of the first inactive slot (claimed for
/// `name`). `None` when every slot is taken.
pub fn find_or_create(slots: &mut [TaskSlot], name: &TaskName) -> Option<usize> {
    if let Some(index) = slots
        .iter()
        .position(|slot| slot.active && slot.name == *name)
    {
        return Some(index);
    }

    let index = slots.iter().position(|slot| !slot.active)?;
    slots[index].activate(name);
    info!(task = %name, slot = index, "Discovered new task");
    Some(index)
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::platform::sim::{task, SimulatedRtos};
    use crate::platform::StackSizeTable;
    use common::TaskHandle;
    use pretty_assertions_sorted::assert_eq;

    const DEPTH: usize = 5;

    fn tick(registry: &mut TaskRegistry, rtos: &SimulatedRtos, stacks: &StackSizeTable) {
        registry.ensure_capacity(rtos).unwrap();
        registry.snapshot(rtos);
        registry.observe(100, stacks, 4);
        registry.reconcile_unseen();
    }

    #[test]
    fn growth_headroom() {
        assert_eq!(TaskRegistry::required_capacity(10, false, 32), 12);
        assert_eq!(TaskRegistry::required_capacity(10, true, 32), 15);
        assert_eq!(TaskRegistry::required_capacity(1, false, 32), 2);
        assert_eq!(TaskRegistry::required_capacity(0, false, 32), 1);
        assert_eq!(TaskRegistry::required_capacity(30, true, 32), 32);
    }

    #[test]
    fn first_sizing_uses_the_task_count() {
        let rtos = SimulatedRtos::new(1);
        rtos.set_tasks((1..=10).map(|n| task(n, &format!("t{n}"), 0)).collect());

        let mut registry = TaskRegistry::new(DEPTH, 32);
        registry.ensure_capacity(&rtos).unwrap();

        assert_eq!(registry.capacity(), 12);
        assert_eq!(rtos.state_queries(), 0);
    }

    #[test]
    fn capacity_never_exceeds_the_maximum() {
        let rtos = SimulatedRtos::new(1);
        rtos.set_tasks((1..=8).map(|n| task(n, &format!("t{n}"), 0)).collect());
        let stacks = StackSizeTable::new();

        let mut registry = TaskRegistry::new(DEPTH, 6);
        for _ in 0..3 {
            tick(&mut registry, &rtos, &stacks);
            assert!(registry.capacity() <= 6);
        }

        registry.snapshot(&rtos);
        let observation = registry.observe(100, &stacks, 4);
        assert_eq!(registry.capacity(), 6);
        assert_eq!(observation.tracked, 6);
        assert_eq!(registry.active_count(), 6);
    }

    #[test]
    fn full_table_drops_new_tasks() {
        let rtos = SimulatedRtos::new(1);
        rtos.set_tasks(vec![task(1, "a", 0), task(2, "b", 0)]);
        let stacks = StackSizeTable::new();

        let mut registry = TaskRegistry::with_capacity(DEPTH, 2, 2).unwrap();
        tick(&mut registry, &rtos, &stacks);

        rtos.set_tasks(vec![task(3, "c", 0)]);
        registry.snapshot(&rtos);
        let observation = registry.observe(100, &stacks, 4);

        assert_eq!(observation, Observation { tracked: 0, dropped: 1 });
        assert!(registry.find_active("c").is_none());
    }

    #[test]
    fn task_stays_active_for_depth_minus_one_absences() {
        let rtos = SimulatedRtos::new(1);
        rtos.set_tasks(vec![task(1, "keeper", 0), task(2, "leaver", 0)]);
        let stacks = StackSizeTable::new();
        let mut registry = TaskRegistry::new(DEPTH, 32);
        tick(&mut registry, &rtos, &stacks);

        rtos.set_tasks(vec![task(1, "keeper", 0)]);
        for _ in 0..DEPTH - 1 {
            tick(&mut registry, &rtos, &stacks);
        }

        let leaver = registry.find_active("leaver").unwrap();
        assert_eq!(leaver.consecutive_absence(), DEPTH - 1);
        assert!(leaver.cpu_percent().as_slice().iter().all(|value| *value == 0.0));

        tick(&mut registry, &rtos, &stacks);
        assert!(registry.find_active("leaver").is_none());
        assert!(registry.find_active("keeper").is_some());
    }

    #[test]
    fn reappearing_task_resets_its_absence() {
        let rtos = SimulatedRtos::new(1);
        rtos.set_tasks(vec![task(1, "blinker", 0)]);
        let stacks = StackSizeTable::new();
        let mut registry = TaskRegistry::new(DEPTH, 32);
        tick(&mut registry, &rtos, &stacks);

        rtos.set_tasks(vec![]);
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.find_active("blinker").unwrap().consecutive_absence(), 1);

        rtos.set_tasks(vec![task(1, "blinker", 10)]);
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.find_active("blinker").unwrap().consecutive_absence(), 0);
    }

    #[test]
    fn vacated_slot_is_reset_for_the_next_task() {
        let rtos = SimulatedRtos::new(1);
        let stacks = StackSizeTable::new();
        stacks.register(TaskHandle(1), 1000);
        rtos.set_tasks(vec![task(1, "old", 0)]);
        rtos.update(|kernel| {
            if let Some(old) = kernel.task_mut("old") {
                old.set_stack_high_water_mark(50);
            }
        });

        let mut registry = TaskRegistry::with_capacity(DEPTH, 1, 1).unwrap();
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.slots()[0].stack().used_bytes(), 800);

        rtos.set_tasks(vec![]);
        for _ in 0..DEPTH {
            tick(&mut registry, &rtos, &stacks);
        }
        assert_eq!(registry.active_count(), 0);

        rtos.set_tasks(vec![task(7, "new", 0)]);
        tick(&mut registry, &rtos, &stacks);

        let slot = &registry.slots()[0];
        assert_eq!(slot.name().as_str(), "new");
        assert_eq!(slot.task_id(), 7);
        assert!(!slot.stack().is_registered());
        assert_eq!(slot.cursor().position(), 1);
        assert!(slot.stack_used_bytes().as_slice().iter().all(|value| *value == 0));
    }

    #[test]
    fn growth_preserves_existing_history() {
        let rtos = SimulatedRtos::new(1);
        let stacks = StackSizeTable::new();
        rtos.set_tasks(vec![task(1, "A", 0), task(2, "B", 0), task(3, "C", 0)]);

        let mut registry = TaskRegistry::with_capacity(DEPTH, 32, 3).unwrap();
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.capacity(), 4);
        assert_eq!(registry.active_count(), 3);

        rtos.set_tasks(vec![
            task(1, "A", 50),
            task(2, "B", 0),
            task(4, "C2", 0),
            task(5, "D", 0),
        ]);
        tick(&mut registry, &rtos, &stacks);

        assert_eq!(registry.capacity(), 6);
        let a = registry.find_active("A").unwrap();
        assert_eq!(a.cursor().position(), 2);
        assert_eq!(a.cpu_percent().chronological(&a.cursor())[DEPTH - 1], 50.0);
        assert_eq!(registry.slots()[0].name().as_str(), "A");
        assert_eq!(registry.slots()[2].name().as_str(), "C");

        let c = registry.find_active("C").unwrap();
        assert_eq!(c.consecutive_absence(), 1);
        assert!(registry.find_active("C2").is_some());
        assert!(registry.find_active("D").is_some());
        assert_eq!(registry.active_count(), 5);
    }

    #[test]
    fn duplicate_names_share_a_slot() {
        let rtos = SimulatedRtos::new(1);
        let stacks = StackSizeTable::new();
        rtos.set_tasks(vec![task(1, "twin", 0), task(2, "twin", 0)]);

        let mut registry = TaskRegistry::new(DEPTH, 32);
        tick(&mut registry, &rtos, &stacks);

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.find_active("twin").unwrap().cursor().position(), 2);

        rtos.set_tasks(vec![task(1, "twin", 5_000), task(2, "twin", 10)]);
        tick(&mut registry, &rtos, &stacks);
        let twin = registry.find_active("twin").unwrap();
        assert_eq!(twin.cursor().position(), 4);
        assert_eq!(twin.latest_cpu_percent(), 0.0);
    }

    #[test]
    fn unnamed_records_are_skipped() {
        let rtos = SimulatedRtos::new(1);
        let stacks = StackSizeTable::new();
        rtos.set_tasks(vec![
            TaskStatus::builder().handle(TaskHandle(9)).build(),
            task(1, "named", 0),
        ]);

        let mut registry = TaskRegistry::new(DEPTH, 32);
        registry.ensure_capacity(&rtos).unwrap();
        registry.snapshot(&rtos);
        let observation = registry.observe(100, &stacks, 4);

        assert_eq!(observation, Observation { tracked: 1, dropped: 0 });
    }

    #[test]
    fn first_observation_seeds_the_baseline() {
        let rtos = SimulatedRtos::new(1);
        let stacks = StackSizeTable::new();
        rtos.set_tasks(vec![task(1, "busy", 5_000)]);

        let mut registry = TaskRegistry::new(DEPTH, 32);
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.find_active("busy").unwrap().latest_cpu_percent(), 0.0);

        rtos.set_tasks(vec![task(1, "busy", 5_025)]);
        tick(&mut registry, &rtos, &stacks);
        let busy = registry.find_active("busy").unwrap();
        assert_eq!(busy.latest_cpu_percent(), 25.0);
        assert_eq!(busy.previous_run_time_counter(), 5_000);
        assert_eq!(busy.run_time_counter(), 5_025);
    }

    #[test]
    fn recreated_task_reseeds_the_baseline() {
        let rtos = SimulatedRtos::new(1);
        let stacks = StackSizeTable::new();
        let mut registry = TaskRegistry::new(DEPTH, 32);

        rtos.set_tasks(vec![task(1, "worker", 50_000)]);
        tick(&mut registry, &rtos, &stacks);
        rtos.set_tasks(vec![task(1, "worker", 50_050)]);
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.find_active("worker").unwrap().latest_cpu_percent(), 50.0);

        rtos.set_tasks(vec![task(2, "worker", 100)]);
        tick(&mut registry, &rtos, &stacks);
        let worker = registry.find_active("worker").unwrap();
        assert_eq!(worker.handle(), TaskHandle(2));
        assert_eq!(worker.latest_cpu_percent(), 0.0);
        assert_eq!(worker.run_time_counter(), 100);

        rtos.set_tasks(vec![task(2, "worker", 130)]);
        tick(&mut registry, &rtos, &stacks);
        assert_eq!(registry.find_active("worker").unwrap().latest_cpu_percent(), 30.0);
    }

    #[test]
    fn clear_releases_all_slots() {
        let mut registry = TaskRegistry::with_capacity(DEPTH, 32, 8).unwrap();
        assert_eq!(registry.capacity(), 8);

        registry.clear();
        assert_eq!(registry.capacity(), 0);
        assert!(registry.scratch().is_empty());
    }
}
