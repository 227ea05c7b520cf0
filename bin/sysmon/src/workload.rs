//! Randomized scheduler activity for the simulated platform.
//!
//! Every core runs an idle task plus a few pinned application tasks. Each step advances
//! the global runtime counter and hands each core's share of the elapsed time to its
//! tasks, with whatever is left going to the core's idle task. Worker tasks come and go
//! so that slot reuse and eviction can be watched live.

use common::{TaskHandle, TaskName};
use metrics::metric::{HeapStats, MemoryRegion};
use metrics::platform::sim::SimulatedRtos;
use metrics::platform::{StackRegistryRef, TaskIntrospection, TaskStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

const PRIMARY_HEAP_BYTES: u64 = 320 * 1024;
const AUXILIARY_HEAP_BYTES: u64 = 4 * 1024 * 1024;
const MAX_WORKERS: usize = 4;
const WORKER_SPAWN_PROBABILITY: f64 = 0.05;
const WORKER_EXIT_PROBABILITY: f64 = 0.03;

struct AppTask {
    handle: TaskHandle,
    core: usize,
    /// Fraction of the core's busy time this task tends to take.
    weight: f64,
    stack_words: u32,
    worker: bool,
}

pub struct Workload {
    rtos: Arc<SimulatedRtos>,
    stacks: StackRegistryRef,
    rng: StdRng,
    cores: usize,
    simulate_heap: bool,
    next_handle: u64,
    next_worker: u32,
    apps: Vec<AppTask>,
    primary_min_free: u64,
}

impl Workload {
    pub fn new(
        rtos: Arc<SimulatedRtos>,
        stacks: StackRegistryRef,
        cores: usize,
        seed: Option<u64>,
        simulate_heap: bool,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut workload = Self {
            rtos,
            stacks,
            rng,
            cores: cores.max(1),
            simulate_heap,
            next_handle: 1,
            next_worker: 0,
            apps: Vec::new(),
            primary_min_free: PRIMARY_HEAP_BYTES,
        };
        workload.boot();
        workload
    }

    fn boot(&mut self) {
        let idle: Vec<TaskStatus> = (0..self.cores)
            .map(|core| {
                let handle = self.allocate_handle();
                self.rtos.set_idle_task(core, handle);
                TaskStatus::builder()
                    .handle(handle)
                    .name(format!("IDLE{core}"))
                    .task_number(handle.0 as u32)
                    .core_id(core as u32)
                    .stack_high_water_mark(256)
                    .build()
            })
            .collect();
        self.rtos.set_tasks(idle);

        let apps = [
            ("main", 0, 0.3, 8192, 1),
            ("sysmon", 0, 0.1, 4096, 5),
            ("wifi", 1, 0.4, 6144, 23),
            ("httpd", 1, 0.2, 4096, 5),
        ];
        for (name, core, weight, stack_bytes, priority) in apps {
            self.spawn(name, core % self.cores, weight, stack_bytes, priority, false);
        }
    }

    fn allocate_handle(&mut self) -> TaskHandle {
        let handle = TaskHandle(0x3ffb_0000 + self.next_handle * 0x100);
        self.next_handle += 1;
        handle
    }

    fn spawn(
        &mut self,
        name: &str,
        core: usize,
        weight: f64,
        stack_bytes: u32,
        priority: u32,
        worker: bool,
    ) {
        let handle = self.allocate_handle();
        let stack_words = stack_bytes / 4;
        self.stacks.register(handle, stack_bytes);
        self.rtos.update(|kernel| {
            kernel.tasks.push(
                TaskStatus::builder()
                    .handle(handle)
                    .name(TaskName::new(name))
                    .task_number(handle.0 as u32)
                    .current_priority(priority)
                    .base_priority(priority)
                    .core_id(core as u32)
                    .stack_high_water_mark(stack_words)
                    .build(),
            )
        });
        self.apps.push(AppTask {
            handle,
            core,
            weight,
            stack_words,
            worker,
        });
        debug!(name, %handle, core, "Spawned simulated task");
    }

    fn churn_workers(&mut self) {
        let workers = self.apps.iter().filter(|app| app.worker).count();
        if workers < MAX_WORKERS && self.rng.gen_bool(WORKER_SPAWN_PROBABILITY) {
            let name = format!("worker_{}", self.next_worker);
            self.next_worker += 1;
            let core = self.rng.gen_range(0..self.cores);
            let weight = self.rng.gen_range(0.05..0.3);
            info!(task = %name, core, "Simulated worker started");
            self.spawn(&name, core, weight, 3072, 3, true);
        }

        if workers > 0 && self.rng.gen_bool(WORKER_EXIT_PROBABILITY) {
            let Some(index) = self.apps.iter().position(|app| app.worker) else {
                return;
            };
            let app = self.apps.remove(index);
            self.stacks.unregister(app.handle);
            self.rtos.update(|kernel| {
                kernel.tasks.retain(|task| task.handle() != app.handle);
            });
            info!(handle = %app.handle, "Simulated worker exited");
        }
    }

    /// Advances the simulation by `elapsed` runtime counter ticks.
    pub fn step(&mut self, elapsed: u32) {
        self.churn_workers();

        let mut busy_by_handle = Vec::with_capacity(self.apps.len());
        let mut idle_by_core = Vec::with_capacity(self.cores);
        for core in 0..self.cores {
            let load: f64 = self.rng.gen_range(0.05..0.85);
            let busy = (elapsed as f64 * load) as u32;

            let on_core: Vec<usize> = (0..self.apps.len())
                .filter(|index| self.apps[*index].core == core)
                .collect();
            let total_weight: f64 = on_core.iter().map(|index| self.apps[*index].weight).sum();

            let mut handed_out = 0u32;
            for index in on_core {
                let app = &self.apps[index];
                let share = if total_weight > 0.0 {
                    (busy as f64 * app.weight / total_weight) as u32
                } else {
                    0
                };
                handed_out = handed_out.saturating_add(share);
                busy_by_handle.push((app.handle, share));
            }
            idle_by_core.push(elapsed.saturating_sub(handed_out));
        }

        let mut hwm_drops: Vec<(TaskHandle, u32)> = Vec::new();
        for app in &self.apps {
            if self.rng.gen_bool(0.1) {
                hwm_drops.push((app.handle, self.rng.gen_range(1..=app.stack_words / 16 + 1)));
            }
        }

        let idle_handles: Vec<Option<TaskHandle>> = (0..self.cores)
            .map(|core| self.rtos.idle_task(core))
            .collect();

        self.rtos.update(|kernel| {
            kernel.total_run_time = kernel.total_run_time.wrapping_add(elapsed);
            for task in kernel.tasks.iter_mut() {
                let handle = task.handle();
                let gained = match idle_handles.iter().position(|idle| *idle == Some(handle)) {
                    Some(core) => idle_by_core[core],
                    None => busy_by_handle
                        .iter()
                        .find(|(busy, _)| *busy == handle)
                        .map(|(_, share)| *share)
                        .unwrap_or(0),
                };
                task.set_run_time_counter(task.run_time_counter().wrapping_add(gained));

                if let Some((_, drop)) = hwm_drops.iter().find(|(dropped, _)| *dropped == handle) {
                    let lowered = task.stack_high_water_mark().saturating_sub(*drop).max(16);
                    task.set_stack_high_water_mark(lowered);
                }
            }
        });

        if self.simulate_heap {
            self.step_heap();
        }
    }

    fn step_heap(&mut self) {
        let used = self
            .rng
            .gen_range(PRIMARY_HEAP_BYTES / 4..PRIMARY_HEAP_BYTES * 3 / 4);
        let free = PRIMARY_HEAP_BYTES - used;
        self.primary_min_free = self.primary_min_free.min(free);
        let largest = free / self.rng.gen_range(1..4);

        self.rtos.set_heap(
            MemoryRegion::Primary,
            HeapStats::builder()
                .free_bytes(free)
                .min_free_bytes(self.primary_min_free)
                .largest_free_block(largest)
                .total_bytes(PRIMARY_HEAP_BYTES)
                .build(),
        );

        let auxiliary_used = self.rng.gen_range(0..AUXILIARY_HEAP_BYTES / 2);
        let auxiliary_free = AUXILIARY_HEAP_BYTES - auxiliary_used;
        self.rtos.set_heap(
            MemoryRegion::Auxiliary,
            HeapStats::builder()
                .free_bytes(auxiliary_free)
                .min_free_bytes(auxiliary_free)
                .largest_free_block(auxiliary_free)
                .total_bytes(AUXILIARY_HEAP_BYTES)
                .build(),
        );
    }
}
