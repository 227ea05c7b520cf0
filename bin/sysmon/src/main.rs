mod workload;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, OnceArgs, ServeArgs};
use common::util::trace::initialize_tracing;
use common::SysmonConfig;
use metrics::platform::host::HostHeap;
use metrics::platform::sim::{simulated_platform, SimulatedRtos};
use metrics::platform::{HeapIntrospectionRef, NullTransport, Platform, StackSizeTable};
use metrics::Sysmon;
use network::{HttpTransport, InterfaceConnectivity};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use workload::Workload;

/// Cores of the simulated scheduler.
const SIMULATED_CORES: usize = 2;

/// Runtime counter ticks per millisecond of simulated time (a 1 MHz counter).
const COUNTER_TICKS_PER_MS: u32 = 1_000;

/// Period of the workload generator.
const WORKLOAD_STEP: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing()?;

    let args = Cli::parse();
    info!("sysmon CLI started");

    match args.command() {
        Commands::Serve(args) => serve(args).await,
        Commands::Once(args) => once(args),
    }
}

#[instrument(skip(args))]
async fn serve(args: &ServeArgs) -> Result<()> {
    let mut config = SysmonConfig::load(args.config().as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let rtos = Arc::new(SimulatedRtos::new(SIMULATED_CORES));
    let stacks = Arc::new(StackSizeTable::new());
    let heap: HeapIntrospectionRef = if args.simulate() {
        rtos.clone()
    } else {
        Arc::new(HostHeap::new())
    };
    let platform = Platform::builder()
        .tasks(rtos.clone())
        .heap(heap)
        .stacks(stacks.clone())
        .connectivity(Arc::new(
            InterfaceConnectivity::new().allow_loopback(args.simulate()),
        ))
        .build();

    let mut workload = Workload::new(rtos, stacks, SIMULATED_CORES, None, args.simulate());
    let generator = tokio::spawn(async move {
        let mut interval = tokio::time::interval(WORKLOAD_STEP);
        loop {
            interval.tick().await;
            workload.step(WORKLOAD_STEP.as_millis() as u32 * COUNTER_TICKS_PER_MS);
        }
    });

    let transport = Arc::new(HttpTransport::new(config.http_address()));
    let sysmon = Sysmon::new(config, platform, transport);
    sysmon.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping sampler...");

    sysmon.stop().await;
    generator.abort();
    Ok(())
}

#[instrument(skip(args))]
fn once(args: &OnceArgs) -> Result<()> {
    let config = SysmonConfig::load(args.config().as_deref())?;

    let rtos = Arc::new(SimulatedRtos::new(SIMULATED_CORES));
    let platform = simulated_platform(rtos.clone());
    let mut workload = Workload::new(
        rtos,
        platform.stacks().clone(),
        SIMULATED_CORES,
        args.seed(),
        true,
    );

    let step = (config.sampling_interval_ms() as u32).saturating_mul(COUNTER_TICKS_PER_MS);
    let sysmon = Sysmon::new(config, platform, Arc::new(NullTransport));
    for tick in 0..args.ticks() {
        workload.step(step);
        let outcome = sysmon.tick_now();
        info!(tick, ?outcome, "Sampled");
    }

    let reader = sysmon.reader();
    let report = json!({
        "status": reader.status(),
        "system": reader.system_current(),
        "tasks": reader.tasks(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
