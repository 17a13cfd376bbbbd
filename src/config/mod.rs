//! Engine configuration.
//!
//! Loaded from a YAML file and `SKALD`-prefixed environment variables
//! (`SKALD__STREAM__STREAM_BATCH_SIZE=...`), with serde defaults for every
//! knob. Durations are millisecond fields so the whole surface stays plain
//! scalars in files and the environment.

use std::time::Duration;

use serde::Deserialize;

/// Environment variable for the configuration file path.
pub const CONFIG_ENV_VAR: &str = "SKALD_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SKALD";

/// What a stream does with a record once its retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    /// Log the loss and advance past the record. The stream keeps flowing;
    /// that handler's side effect for the record is accepted as lost.
    SkipEvent,
    /// Halt the stream until an operator intervenes. For streams where later
    /// records' correctness depends on this one.
    Suspend,
}

/// Write-path configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcingConfig {
    /// Events per snapshot; 0 disables snapshotting.
    pub snapshot_frequency: i64,
    /// Cap on optimistic-concurrency append attempts per command.
    pub max_concurrency_attempts: u32,
}

impl Default for SourcingConfig {
    fn default() -> Self {
        Self {
            snapshot_frequency: 10,
            max_concurrency_attempts: 20,
        }
    }
}

/// Per-stream reader configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum records fetched per poll.
    pub stream_batch_size: usize,
    /// Poll backoff when a batch comes back empty, in milliseconds.
    pub stream_read_period_ms: u64,
    /// Lease staleness threshold: a holder silent for longer than this is
    /// considered dead and its lease becomes claimable.
    pub max_active_reader_inactivity_period_ms: u64,
    /// How often the active reader refreshes its lease.
    pub heartbeat_period_ms: u64,
    /// Delivery attempts per record before the failure policy applies.
    pub retry_max_attempts: u32,
    /// What to do with a record whose retries are exhausted.
    pub on_exhausted: FailurePolicy,
    /// Durably commit the checkpoint every Nth accepted record. Crash
    /// recovery reprocesses at most N records, which consumers must
    /// tolerate idempotently.
    pub commit_index_every: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_batch_size: 64,
            stream_read_period_ms: 200,
            max_active_reader_inactivity_period_ms: 5_000,
            heartbeat_period_ms: 1_000,
            retry_max_attempts: 3,
            on_exhausted: FailurePolicy::SkipEvent,
            commit_index_every: 10,
        }
    }
}

impl StreamConfig {
    pub fn stream_read_period(&self) -> Duration {
        Duration::from_millis(self.stream_read_period_ms)
    }

    pub fn max_active_reader_inactivity_period(&self) -> Duration {
        Duration::from_millis(self.max_active_reader_inactivity_period_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sourcing: SourcingConfig,
    pub stream: StreamConfig,
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier: `skald.yaml` in the current
    /// directory (if present), the file at `path` (if given), the file named
    /// by `SKALD_CONFIG` (if set), then `SKALD__`-prefixed environment
    /// variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new("skald", FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
