//! Configuration for netplane
//!
//! Structured configuration with sensible defaults, TOML file loading,
//! environment variable overrides and validation before use.

use crate::error::{NetplaneError, NetplaneResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod agent;
pub mod defaults;
pub mod jobs;
pub mod lock;
pub mod storage;

pub use agent::AgentConfig;
pub use defaults::*;
pub use jobs::JobConfig;
pub use lock::LockConfig;
pub use storage::StorageConfig;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetplaneConfig {
    /// Management server id; owner of jobs, locks and work records
    pub node_id: u64,

    /// Shared store configuration
    pub storage: StorageConfig,

    /// Distributed lock configuration
    pub lock: LockConfig,

    /// Async job configuration
    pub jobs: JobConfig,

    /// Agent transport configuration
    pub agent: AgentConfig,
}

impl Default for NetplaneConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            storage: StorageConfig::default(),
            lock: LockConfig::default(),
            jobs: JobConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl NetplaneConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> NetplaneResult<Self> {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("NETPLANE_NODE_ID") {
            config.node_id = id.parse().map_err(|_| {
                NetplaneError::configuration("node_id", "Invalid NETPLANE_NODE_ID")
            })?;
        }

        config.storage = StorageConfig::from_env()?;
        config.lock = LockConfig::from_env()?;
        config.jobs = JobConfig::from_env()?;
        config.agent = AgentConfig::from_env()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply `NETPLANE_NODE_ID`
    pub fn from_file(path: impl AsRef<Path>) -> NetplaneResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let mut config: NetplaneConfig = toml::from_str(&contents)?;

        if let Ok(id) = std::env::var("NETPLANE_NODE_ID") {
            config.node_id = id.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> NetplaneResult<()> {
        if self.node_id == 0 {
            return Err(NetplaneError::configuration(
                "node_id",
                "node_id must be non-zero",
            ));
        }

        self.storage.validate()?;
        self.lock.validate()?;
        self.jobs.validate()?;
        self.agent.validate()?;

        Ok(())
    }

    /// Create a test configuration with short timeouts
    pub fn test() -> Self {
        let mut config = Self::default();
        config.node_id = 1;
        config.lock.default_timeout = Duration::from_secs(1);
        config.jobs.wakeup_interval = Duration::from_millis(20);
        config.agent.command_timeout = Duration::from_secs(2);
        config.agent.migration_step_timeout = Duration::from_secs(2);
        config
    }
}

/// Builder for NetplaneConfig
pub struct NetplaneConfigBuilder {
    config: NetplaneConfig,
}

impl NetplaneConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NetplaneConfig::default(),
        }
    }

    pub fn node_id(mut self, id: u64) -> Self {
        self.config.node_id = id;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.config.lock = lock;
        self
    }

    pub fn jobs(mut self, jobs: JobConfig) -> Self {
        self.config.jobs = jobs;
        self
    }

    pub fn agent(mut self, agent: AgentConfig) -> Self {
        self.config.agent = agent;
        self
    }

    pub fn build(self) -> NetplaneResult<NetplaneConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for NetplaneConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper functions for duration parsing
pub(crate) fn parse_duration_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

pub(crate) fn parse_duration_secs_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let mut config = NetplaneConfig::default();
        config.node_id = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = NetplaneConfig::default(); // node_id is 0
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = NetplaneConfigBuilder::new().node_id(42).build().unwrap();
        assert_eq!(config.node_id, 42);
        assert_eq!(config.jobs.vm_work_queue, DEFAULT_VM_WORK_QUEUE);
    }

    #[test]
    fn test_toml_round_trip_with_humantime() {
        let text = r#"
            node_id = 7

            [lock]
            lease_ttl = "2m"
            default_timeout = "3s"

            [agent]
            command_timeout = "30s"
        "#;
        let config: NetplaneConfig = toml::from_str(text).unwrap();
        assert_eq!(config.node_id, 7);
        assert_eq!(config.lock.lease_ttl, Duration::from_secs(120));
        assert_eq!(config.lock.default_timeout, Duration::from_secs(3));
        assert_eq!(config.agent.command_timeout, Duration::from_secs(30));
        // untouched sections keep their defaults
        assert_eq!(config.jobs, JobConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_poll_bounds() {
        let mut config = NetplaneConfig::test();
        config.lock.min_poll_interval = Duration::from_secs(1);
        config.lock.max_poll_interval = Duration::from_millis(1);
        assert!(config.validate().is_err());
    }
}
