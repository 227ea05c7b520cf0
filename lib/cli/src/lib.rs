use clap::{Args, Parser, Subcommand};
use common::SysmonConfig;
use getset::{CopyGetters, Getters};
use std::path::PathBuf;
use tracing::debug;

/// sysmon: task and heap sampler for an RTOS scheduler
#[derive(Debug, Parser, Getters)]
#[command(name = "sysmon")]
#[command(about = "sysmon: per-task CPU, stack and heap history over HTTP", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    #[getset(get = "pub")]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sample continuously and serve the history over HTTP until Ctrl-C
    Serve(ServeArgs),
    /// Take a few samples against the simulated scheduler and print them as JSON
    Once(OnceArgs),
}

#[derive(Debug, Args, Getters, CopyGetters)]
pub struct ServeArgs {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    #[getset(get = "pub")]
    config: Option<PathBuf>,
    /// Port to serve the HTTP API on (overrides the configuration)
    #[arg(short, long)]
    #[getset(get_copy = "pub")]
    port: Option<u16>,
    /// Sampling period in milliseconds (overrides the configuration)
    #[arg(short, long)]
    #[getset(get_copy = "pub")]
    interval_ms: Option<u64>,
    /// Number of samples kept per series (overrides the configuration)
    #[arg(short, long)]
    #[getset(get_copy = "pub")]
    samples: Option<usize>,
    /// Drive the simulated scheduler with a randomized workload
    #[arg(long)]
    #[getset(get_copy = "pub")]
    simulate: bool,
}

impl ServeArgs {
    /// Writes every flag that was given over the matching configuration field.
    pub fn apply(&self, config: &mut SysmonConfig) {
        if let Some(port) = self.port {
            debug!(port, "Port overridden on the command line");
            config.set_http_port(port);
        }
        if let Some(interval_ms) = self.interval_ms {
            config.set_sampling_interval_ms(interval_ms);
        }
        if let Some(samples) = self.samples {
            config.set_sample_count(samples);
        }
    }
}

#[derive(Debug, Args, Getters, CopyGetters)]
pub struct OnceArgs {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    #[getset(get = "pub")]
    config: Option<PathBuf>,
    /// Number of ticks to sample before printing
    #[arg(short, long, default_value_t = 5)]
    #[getset(get_copy = "pub")]
    ticks: u32,
    /// Seed of the simulated workload
    #[arg(long)]
    #[getset(get_copy = "pub")]
    seed: Option<u64>,
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use pretty_assertions_sorted::assert_eq;

    #[test]
    fn serve_flags_override_the_configuration() {
        let cli = Cli::try_parse_from([
            "sysmon", "serve", "--port", "9000", "--samples", "120", "--simulate",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command() else {
            panic!("expected the serve command");
        };
        assert!(args.simulate());

        let mut config = SysmonConfig::default();
        args.apply(&mut config);

        assert_eq!(config.http_port(), 9000);
        assert_eq!(config.sample_count(), 120);
        assert_eq!(
            config.sampling_interval_ms(),
            common::DEFAULT_SAMPLING_INTERVAL_MS
        );
    }

    #[test]
    fn once_defaults() {
        let cli = Cli::try_parse_from(["sysmon", "once"]).unwrap();
        let Commands::Once(args) = cli.command() else {
            panic!("expected the once command");
        };
        assert_eq!(args.ticks(), 5);
        assert_eq!(args.seed(), None);
        assert!(args.config().is_none());
    }
}
