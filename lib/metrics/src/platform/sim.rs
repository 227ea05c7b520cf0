//! Scripted scheduler, allocator and network link.
//!
//! [`SimulatedRtos`] answers introspection queries from state set by its owner, so a test
//! (or a workload generator) controls exactly what each tick observes.

use super::{
    Connectivity, ConnectivityError, HeapIntrospection, Platform, StackSizeTable,
    TaskIntrospection, TaskStatus,
};
use crate::metric::{HeapStats, MemoryRegion};
use common::{TaskHandle, TaskName};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Mutable state of a [`SimulatedRtos`].
#[derive(Debug, Default)]
pub struct SimKernel {
    pub tasks: Vec<TaskStatus>,
    pub total_run_time: u32,
    pub idle_tasks: Vec<Option<TaskHandle>>,
    pub heap: HashMap<MemoryRegion, HeapStats>,
}

impl SimKernel {
    pub fn task_mut(&mut self, name: &str) -> Option<&mut TaskStatus> {
        self.tasks
            .iter_mut()
            .find(|task| task.name().as_ref().is_some_and(|n| n == name))
    }

    pub fn remove_task(&mut self, name: &str) -> Option<TaskStatus> {
        let index = self
            .tasks
            .iter()
            .position(|task| task.name().as_ref().is_some_and(|n| n == name))?;
        Some(self.tasks.remove(index))
    }
}

#[derive(Debug, Default)]
pub struct SimulatedRtos {
    kernel: Mutex<SimKernel>,
    cores: usize,
    state_queries: AtomicUsize,
}

impl SimulatedRtos {
    pub fn new(cores: usize) -> Self {
        Self {
            kernel: Mutex::new(SimKernel {
                idle_tasks: vec![None; cores],
                ..SimKernel::default()
            }),
            cores,
            state_queries: AtomicUsize::new(0),
        }
    }

    /// Runs `f` with exclusive access to the simulated kernel.
    pub fn update<R>(&self, f: impl FnOnce(&mut SimKernel) -> R) -> R {
        f(&mut self.kernel.lock())
    }

    pub fn set_tasks(&self, tasks: Vec<TaskStatus>) {
        self.kernel.lock().tasks = tasks;
    }

    pub fn set_total_run_time(&self, total_run_time: u32) {
        self.kernel.lock().total_run_time = total_run_time;
    }

    pub fn set_idle_task(&self, core: usize, handle: TaskHandle) {
        let mut kernel = self.kernel.lock();
        if let Some(slot) = kernel.idle_tasks.get_mut(core) {
            *slot = Some(handle);
        }
    }

    pub fn set_heap(&self, region: MemoryRegion, stats: HeapStats) {
        self.kernel.lock().heap.insert(region, stats);
    }

    /// Number of `system_state` calls answered so far.
    pub fn state_queries(&self) -> usize {
        self.state_queries.load(Ordering::Relaxed)
    }
}

impl TaskIntrospection for SimulatedRtos {
    fn task_count(&self) -> usize {
        self.kernel.lock().tasks.len()
    }

    fn system_state(&self, buffer: &mut Vec<TaskStatus>, capacity: usize) -> u32 {
        self.state_queries.fetch_add(1, Ordering::Relaxed);
        let kernel = self.kernel.lock();
        buffer.clear();
        buffer.extend(kernel.tasks.iter().take(capacity).cloned());
        kernel.total_run_time
    }

    fn idle_task(&self, core: usize) -> Option<TaskHandle> {
        self.kernel.lock().idle_tasks.get(core).copied().flatten()
    }

    fn core_count(&self) -> usize {
        self.cores
    }
}

impl HeapIntrospection for SimulatedRtos {
    fn heap_stats(&self, region: MemoryRegion) -> HeapStats {
        self.kernel
            .lock()
            .heap
            .get(&region)
            .copied()
            .unwrap_or_default()
    }
}

/// Connectivity check with a switchable outcome.
#[derive(Debug)]
pub struct StaticConnectivity {
    ready: AtomicBool,
    address: IpAddr,
}

impl StaticConnectivity {
    pub fn ready(address: IpAddr) -> Self {
        Self {
            ready: AtomicBool::new(true),
            address,
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ready: AtomicBool::new(false),
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::ready(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl Connectivity for StaticConnectivity {
    fn check(&self) -> Result<IpAddr, ConnectivityError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(self.address)
        } else {
            Err(ConnectivityError::NotReady(
                "simulated link is down".to_string(),
            ))
        }
    }
}

/// Shorthand for a named task record with the fields tests usually care about.
pub fn task(handle: u64, name: &str, run_time_counter: u32) -> TaskStatus {
    TaskStatus::builder()
        .handle(TaskHandle(handle))
        .name(TaskName::new(name))
        .task_number(handle as u32)
        .run_time_counter(run_time_counter)
        .build()
}

/// A [`Platform`] whose tasks and heap both come from `rtos`, with an empty stack table
/// and a ready loopback link.
pub fn simulated_platform(rtos: Arc<SimulatedRtos>) -> Platform {
    Platform::builder()
        .tasks(rtos.clone())
        .heap(rtos)
        .stacks(Arc::new(StackSizeTable::new()))
        .connectivity(Arc::new(StaticConnectivity::default()))
        .build()
}
