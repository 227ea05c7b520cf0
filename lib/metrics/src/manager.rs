use crate::platform::{Platform, TransportRef};
use crate::sampler::{SamplerState, TickOutcome};
use crate::snapshot::{SharedState, SysmonReader};
use common::util::time::format_duration;
use common::{SysmonConfig, TaskHandle};
use core::fmt;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SysmonError {
    #[error("Connectivity check failed: {0}")]
    ConnectivityNotReady(String),
    #[error("Failed to start transport: {0}")]
    TransportStart(#[source] anyhow::Error),
}

/// A reference-counted reference to a [`Sysmon`].
pub type SysmonRef = Arc<Sysmon>;

/// Owns the sampler state and the periodic task that writes it.
pub struct Sysmon {
    config: SysmonConfig,
    platform: Platform,
    transport: TransportRef,
    shared: Arc<SharedState>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    started_at: SyncMutex<Option<Instant>>,
}

impl fmt::Debug for Sysmon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sysmon")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Sysmon {
    pub fn new(config: SysmonConfig, platform: Platform, transport: TransportRef) -> Self {
        let cores = platform.tasks().core_count();
        let sampler = SamplerState::new(&config, cores);
        Self {
            config,
            platform,
            transport,
            shared: Arc::new(SharedState::new(sampler)),
            monitor: Mutex::new(None),
            started_at: SyncMutex::new(None),
        }
    }

    pub fn reader(&self) -> SysmonReader {
        SysmonReader::new(self.shared.clone())
    }

    pub fn config(&self) -> &SysmonConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.lifecycle.read()
    }

    fn set_state(&self, state: LifecycleState) {
        trace!(%state, "Lifecycle transition");
        *self.shared.lifecycle.write() = state;
    }

    /// Checks connectivity, starts the transport and spawns the sampling task.
    ///
    /// Starting an already running instance does nothing and succeeds.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SysmonError> {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            debug!("Sampler already running");
            return Ok(());
        }

        let address = self.platform.connectivity().check().map_err(|error| {
            error!(%error, "Initialization failed: connectivity check failed");
            SysmonError::ConnectivityNotReady(error.to_string())
        })?;

        self.set_state(LifecycleState::Starting);
        if let Err(error) = self.transport.start(self.reader()).await {
            error!(%error, "Cannot start transport");
            self.set_state(LifecycleState::Stopped);
            return Err(SysmonError::TransportStart(error));
        }

        let shared = self.shared.clone();
        let platform = self.platform.clone();
        let period = self.config.sampling_interval();
        *monitor = Some(tokio::spawn(async move {
            debug!("Sampling every {}", format_duration(period));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                shared.sampler.write().tick(&platform);
            }
        }));

        *self.started_at.lock() = Some(Instant::now());
        self.set_state(LifecycleState::Running);
        info!(
            "sysmon initialized and ready: http://{}:{}/",
            address,
            self.config.http_port()
        );
        Ok(())
    }

    /// Stops the transport and the sampling task, then releases the slot table and the
    /// stack registry. System history survives. Safe to call at any time, any number of
    /// times.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut monitor = self.monitor.lock().await;

        self.transport.stop().await;

        if let Some(handle) = monitor.take() {
            handle.abort();
            if let Err(error) = handle.await {
                trace!(%error, "Sampling task ended");
            }
        }

        self.shared.sampler.write().release();
        self.platform.stacks().clear();
        self.set_state(LifecycleState::Stopped);

        if let Some(started_at) = self.started_at.lock().take() {
            info!(
                "sysmon stopped after {}",
                format_duration(started_at.elapsed())
            );
        }
    }

    /// Runs one tick on the caller's context.
    pub fn tick_now(&self) -> TickOutcome {
        self.shared.sampler.write().tick(&self.platform)
    }

    /// Records the stack size a task was created with, so its stack usage can be derived.
    pub fn register_task_stack(&self, handle: TaskHandle, size_bytes: u32) {
        self.platform.stacks().register(handle, size_bytes);
    }

    pub fn unregister_task_stack(&self, handle: TaskHandle) {
        self.platform.stacks().unregister(handle);
    }
}

impl Drop for Sysmon {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}
