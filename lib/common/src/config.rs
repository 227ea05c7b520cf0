//! Configuration parameters for the sampler and its HTTP transport.

use config::{Config, Environment, File, FileFormat};
use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use typed_builder::TypedBuilder;

/// Period between two sampling ticks (in milliseconds).
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1000;

/// Number of samples retained by every history series. A task that stays absent for this
/// many consecutive ticks is evicted from the registry.
pub const DEFAULT_SAMPLE_COUNT: usize = 60;

/// Hard ceiling on the number of task slots the registry may ever allocate.
pub const DEFAULT_MAX_TRACKED_TASKS: usize = 32;

/// Address the HTTP transport binds to.
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";

/// Port the HTTP transport binds to.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Bytes per stack word, used to turn a high-water-mark (in words) into bytes.
pub const DEFAULT_STACK_WORD_SIZE: u32 = 4;

/// Size of the scheduler's task name field, terminator included. Stored names keep at most
/// `MAX_TASK_NAME_LEN - 1` bytes.
pub const MAX_TASK_NAME_LEN: usize = 16;

/// Prefix of the environment variables that override file configuration
/// (e.g. `SYSMON__SAMPLE_COUNT=120`).
pub const ENV_PREFIX: &str = "SYSMON";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    CopyGetters,
    Getters,
    Setters,
    TypedBuilder,
)]
pub struct SysmonConfig {
    #[builder(default = DEFAULT_SAMPLING_INTERVAL_MS)]
    #[getset(get_copy = "pub", set = "pub")]
    sampling_interval_ms: u64,
    #[builder(default = DEFAULT_SAMPLE_COUNT)]
    #[getset(get_copy = "pub", set = "pub")]
    sample_count: usize,
    #[builder(default = DEFAULT_MAX_TRACKED_TASKS)]
    #[getset(get_copy = "pub", set = "pub")]
    max_tracked_tasks: usize,
    #[builder(default = DEFAULT_HTTP_HOST.to_string(), setter(into))]
    #[getset(get = "pub", set = "pub")]
    http_host: String,
    #[builder(default = DEFAULT_HTTP_PORT)]
    #[getset(get_copy = "pub", set = "pub")]
    http_port: u16,
    #[builder(default = DEFAULT_STACK_WORD_SIZE)]
    #[getset(get_copy = "pub", set = "pub")]
    stack_word_size: u32,
}

impl Default for SysmonConfig {
    fn default() -> Self {
        SysmonConfig::builder().build()
    }
}

impl SysmonConfig {
    /// Loads the configuration from built-in defaults, an optional TOML file and the
    /// environment, in increasing order of precedence.
    pub fn load(file_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("sampling_interval_ms", DEFAULT_SAMPLING_INTERVAL_MS as i64)?
            .set_default("sample_count", DEFAULT_SAMPLE_COUNT as i64)?
            .set_default("max_tracked_tasks", DEFAULT_MAX_TRACKED_TASKS as i64)?
            .set_default("http_host", DEFAULT_HTTP_HOST)?
            .set_default("http_port", DEFAULT_HTTP_PORT as i64)?
            .set_default("stack_word_size", DEFAULT_STACK_WORD_SIZE as i64)?;

        if let Some(path) = file_path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder
                .add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(false));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<SysmonConfig>()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sampling_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::Invalid(
                "sample_count must be greater than zero".to_string(),
            ));
        }
        if self.max_tracked_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_tracked_tasks must be greater than zero".to_string(),
            ));
        }
        if self.stack_word_size == 0 {
            return Err(ConfigError::Invalid(
                "stack_word_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}
