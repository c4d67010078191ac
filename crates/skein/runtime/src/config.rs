//! Runtime configuration

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use skein_types::{SkeinError, SkeinResult};

/// Tunables of one workflow runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Expiration stamped on instances submitted without one
    #[serde(default = "default_expiration")]
    pub default_expiration_secs: u64,

    /// Worker partitions per runtime
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Re-runs of an idempotent step after a retryable error
    #[serde(default = "default_max_step_retries")]
    pub max_step_retries: u32,

    /// Base delay between step re-runs, multiplied by the attempt number
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// How long `submit_and_wait` waits for a terminal stage
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,

    /// Minimum time a terminal instance stays readable
    #[serde(default = "default_terminal_retention")]
    pub terminal_retention_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_expiration_secs: default_expiration(),
            workers: default_workers(),
            max_step_retries: default_max_step_retries(),
            retry_backoff_ms: default_retry_backoff(),
            wait_timeout_secs: default_wait_timeout(),
            terminal_retention_secs: default_terminal_retention(),
        }
    }
}

impl RuntimeConfig {
    /// Expiration stamped on instances submitted without one
    pub fn default_expiration(&self) -> SkeinResult<Duration> {
        bounded_seconds("default_expiration_secs", self.default_expiration_secs)
    }

    /// Minimum time a terminal instance stays readable
    pub fn terminal_retention(&self) -> SkeinResult<Duration> {
        bounded_seconds("terminal_retention_secs", self.terminal_retention_secs)
    }

    /// Reject durations that cannot be added to the current time
    pub fn validate(&self) -> SkeinResult<()> {
        self.default_expiration()?;
        self.terminal_retention()?;
        Ok(())
    }
}

fn bounded_seconds(field: &str, secs: u64) -> SkeinResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .filter(|d| Utc::now().checked_add_signed(*d).is_some())
        .ok_or_else(|| {
            SkeinError::Validation(format!("{} = {} is out of range", field, secs))
        })
}

fn default_expiration() -> u64 {
    300
}

fn default_workers() -> usize {
    4
}

fn default_max_step_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    50
}

fn default_wait_timeout() -> u64 {
    30
}

fn default_terminal_retention() -> u64 {
    60
}
