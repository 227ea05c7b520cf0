//! Seams between the sampler and the system it observes.
//!
//! The sampler never talks to a scheduler, an allocator or a network stack directly; it
//! goes through the traits below. [`sim`] provides a scripted implementation of all of
//! them and [`host`] a heap backend for hosted builds.

pub mod host;
pub mod sim;

use crate::metric::{HeapStats, MemoryRegion};
use crate::snapshot::SysmonReader;
use async_trait::async_trait;
use common::{TaskHandle, TaskName};
use dashmap::DashMap;
use getset::{CopyGetters, Getters, Setters};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

/// One task record, as reported by the scheduler's system-state query.
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters, Getters, Setters, TypedBuilder)]
pub struct TaskStatus {
    #[getset(get_copy = "pub")]
    handle: TaskHandle,
    /// `None` for records the scheduler returned without a name. Those are not tracked.
    #[builder(default, setter(strip_option, into))]
    #[getset(get = "pub")]
    name: Option<TaskName>,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    task_number: u32,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    current_priority: u32,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    base_priority: u32,
    /// Core the task is pinned to, when the scheduler reports it.
    #[builder(default, setter(strip_option))]
    #[getset(get_copy = "pub")]
    core_id: Option<u32>,
    /// Cumulative runtime counter. Free-running, wraps at `u32::MAX`.
    #[builder(default)]
    #[getset(get_copy = "pub", set = "pub")]
    run_time_counter: u32,
    /// Minimum free stack ever observed, in stack words.
    #[builder(default)]
    #[getset(get_copy = "pub", set = "pub")]
    stack_high_water_mark: u32,
}

/// Scheduler introspection.
pub trait TaskIntrospection: Send + Sync {
    /// Number of tasks currently known to the scheduler. Expected to be cheap.
    fn task_count(&self) -> usize;

    /// Replaces the contents of `buffer` with at most `capacity` task records and returns
    /// the global cumulative runtime counter. When more than `capacity` tasks exist the
    /// result is silently truncated; a full buffer is the caller's signal to grow.
    fn system_state(&self, buffer: &mut Vec<TaskStatus>, capacity: usize) -> u32;

    /// Handle of the idle task pinned to `core`.
    fn idle_task(&self, core: usize) -> Option<TaskHandle>;

    fn core_count(&self) -> usize;
}

/// Heap allocator introspection.
pub trait HeapIntrospection: Send + Sync {
    /// Statistics of `region`. An absent region reports a total of zero.
    fn heap_stats(&self, region: MemoryRegion) -> HeapStats;
}

/// Registered stack sizes, keyed by task handle.
///
/// The scheduler only knows how much stack a task has left; how much it was given is
/// recorded here by whoever created the task.
pub trait StackRegistry: Send + Sync {
    fn register(&self, handle: TaskHandle, size_bytes: u32);
    fn unregister(&self, handle: TaskHandle);
    fn stack_size(&self, handle: TaskHandle) -> Option<u32>;
    fn clear(&self);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("Network is not ready: {0}")]
    NotReady(String),
}

/// Precondition checked before the sampler and its transport start.
pub trait Connectivity: Send + Sync {
    /// Address the transport will be reachable at.
    fn check(&self) -> Result<IpAddr, ConnectivityError>;
}

/// The layer that serves sampled data to consumers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self, reader: SysmonReader) -> anyhow::Result<()>;
    async fn stop(&self);
}

/// A reference-counted reference to a [`TaskIntrospection`].
pub type TaskIntrospectionRef = Arc<dyn TaskIntrospection>;

/// A reference-counted reference to a [`HeapIntrospection`].
pub type HeapIntrospectionRef = Arc<dyn HeapIntrospection>;

/// A reference-counted reference to a [`StackRegistry`].
pub type StackRegistryRef = Arc<dyn StackRegistry>;

/// A reference-counted reference to a [`Connectivity`] check.
pub type ConnectivityRef = Arc<dyn Connectivity>;

/// A reference-counted reference to a [`Transport`].
pub type TransportRef = Arc<dyn Transport>;

/// Everything the sampler consumes from the system it runs on.
#[derive(Clone, Getters, TypedBuilder)]
#[getset(get = "pub")]
pub struct Platform {
    tasks: TaskIntrospectionRef,
    heap: HeapIntrospectionRef,
    stacks: StackRegistryRef,
    connectivity: ConnectivityRef,
}

/// [`StackRegistry`] backed by a concurrent map.
#[derive(Debug, Default)]
pub struct StackSizeTable {
    sizes: DashMap<TaskHandle, u32>,
}

impl StackSizeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

impl StackRegistry for StackSizeTable {
    fn register(&self, handle: TaskHandle, size_bytes: u32) {
        debug!(%handle, size_bytes, "Registering task stack size");
        self.sizes.insert(handle, size_bytes);
    }

    fn unregister(&self, handle: TaskHandle) {
        trace!(%handle, "Unregistering task stack size");
        self.sizes.remove(&handle);
    }

    fn stack_size(&self, handle: TaskHandle) -> Option<u32> {
        self.sizes.get(&handle).map(|entry| *entry.value())
    }

    fn clear(&self) {
        self.sizes.clear();
    }
}

/// Transport that serves nothing. For headless runs and tests.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn start(&self, _reader: SysmonReader) -> anyhow::Result<()> {
        trace!("Starting null transport (no-op)");
        Ok(())
    }

    async fn stop(&self) {
        trace!("Stopping null transport (no-op)");
    }
}

#[cfg(test)]
mod stack_table_tests {
    use super::*;

    #[test]
    fn register_lookup_and_clear() {
        let table = StackSizeTable::new();
        assert_eq!(table.stack_size(TaskHandle(1)), None);

        table.register(TaskHandle(1), 4096);
        table.register(TaskHandle(2), 2048);
        assert_eq!(table.stack_size(TaskHandle(1)), Some(4096));
        assert_eq!(table.len(), 2);

        table.unregister(TaskHandle(1));
        assert_eq!(table.stack_size(TaskHandle(1)), None);

        table.clear();
        assert!(table.is_empty());
    }
}
