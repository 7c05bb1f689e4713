//! Async job configuration

use super::defaults::*;
use super::{parse_duration_from_env, parse_duration_secs_from_env};
use crate::error::{NetplaneError, NetplaneResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Async job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Upper bound on dispatcher invocations running at once on this node
    pub max_concurrent_jobs: usize,

    /// How often the wake-up loop checks joined jobs
    #[serde(with = "humantime_serde")]
    pub wakeup_interval: Duration,

    /// Join timeout used when a caller does not supply one
    #[serde(with = "humantime_serde")]
    pub default_join_timeout: Duration,

    /// Queue that serializes work per VM instance
    pub vm_work_queue: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            wakeup_interval: duration_ms(DEFAULT_WAKEUP_INTERVAL_MS),
            default_join_timeout: duration_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            vm_work_queue: DEFAULT_VM_WORK_QUEUE.to_string(),
        }
    }
}

impl JobConfig {
    /// Load from environment variables
    pub fn from_env() -> NetplaneResult<Self> {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("NETPLANE_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = max.parse()?;
        }

        config.wakeup_interval =
            parse_duration_from_env("NETPLANE_JOB_WAKEUP_MS", config.wakeup_interval);
        config.default_join_timeout =
            parse_duration_secs_from_env("NETPLANE_JOIN_TIMEOUT_SECS", config.default_join_timeout);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> NetplaneResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(NetplaneError::configuration(
                "jobs.max_concurrent_jobs",
                "at least one job must be allowed to run",
            ));
        }
        if self.wakeup_interval.is_zero() {
            return Err(NetplaneError::configuration(
                "jobs.wakeup_interval",
                "wake-up interval must be non-zero",
            ));
        }
        if self.vm_work_queue.is_empty() {
            return Err(NetplaneError::configuration(
                "jobs.vm_work_queue",
                "queue name cannot be empty",
            ));
        }
        Ok(())
    }
}
