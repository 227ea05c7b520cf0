//! Sampling and history engine for an RTOS task scheduler and heap allocator.
//!
//! A [`manager::Sysmon`] owns a [`sampler::SamplerState`] and drives it from a periodic
//! background task. Every tick reconciles the scheduler's task list against the
//! [`registry::TaskRegistry`], derives CPU, stack and heap figures through the
//! [`collector`]s and appends them to fixed-depth [`series`]. Consumers read the result
//! through a [`snapshot::SysmonReader`].

pub mod collector;
pub mod manager;
pub mod metric;
pub mod platform;
pub mod registry;
pub mod sampler;
pub mod series;
pub mod snapshot;

pub use manager::{LifecycleState, Sysmon, SysmonError, SysmonRef};
pub use sampler::{SamplerState, SkipReason, TickOutcome};
pub use snapshot::SysmonReader;
