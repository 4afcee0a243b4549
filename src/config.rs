use std::{fs, path::Path};

use serde::Deserialize;

use crate::{FlowError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// store config
    pub store: StoreConfig,
    /// number of async worker threads, range [1, 32768), defaults to 16
    pub async_worker_thread_number: u16,
    /// worker pool and sweep config
    pub scheduler: SchedulerConfig,
    /// slack incoming webhook config
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// store type
    #[serde(default)]
    pub store_type: StoreType,
    /// postgres config
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    #[default]
    Mem,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// postgres database url
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// number of concurrent worker tasks pulling runs
    pub workers: usize,
    /// capacity of the direct dispatch queue
    pub queue_capacity: usize,
    /// interval between sweeps for due runs, in milliseconds
    pub sweep_interval_ms: u64,
    /// how long a claim on a run stays valid, in milliseconds
    pub lease_ms: u64,
    /// upper bound for a single dispatcher call, in milliseconds
    pub dispatch_timeout_ms: u64,
    /// attempts per action node before a retryable failure becomes terminal
    pub max_attempts: u32,
    /// first retry delay, doubled on every further attempt
    pub backoff_base_ms: u64,
    /// cap for the retry delay
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    /// incoming webhook used by the default slack poster
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            async_worker_thread_number: 16,
            scheduler: SchedulerConfig::default(),
            slack: SlackConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            sweep_interval_ms: 5_000,
            lease_ms: 60_000,
            dispatch_timeout_ms: 30_000,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 300_000,
        }
    }
}

impl SchedulerConfig {
    /// Delay before the retry that follows `attempt` failed attempts.
    pub fn backoff_ms(
        &self,
        attempt: u32,
    ) -> u64 {
        let exp = attempt.saturating_sub(1).min(32);
        self.backoff_base_ms.saturating_mul(1u64 << exp).min(self.backoff_max_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(FlowError::Config("scheduler.workers must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(FlowError::Config("scheduler.max_attempts must be at least 1".to_string()));
        }
        if self.lease_ms <= self.dispatch_timeout_ms {
            return Err(FlowError::Config(format!(
                "scheduler.lease_ms ({}) must exceed scheduler.dispatch_timeout_ms ({})",
                self.lease_ms, self.dispatch_timeout_ms
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| FlowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.store_type == StoreType::Postgres && self.store.postgres.is_none() {
            return Err(FlowError::Config("store.postgres is required when store_type is postgres".to_string()));
        }
        self.scheduler.validate()
    }
}
