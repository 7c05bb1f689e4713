//! Agent transport configuration

use super::defaults::*;
use super::parse_duration_secs_from_env;
use crate::error::{NetplaneError, NetplaneResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Agent transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default per-command timeout
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Timeout for each remote step of a storage live migration
    #[serde(with = "humantime_serde")]
    pub migration_step_timeout: Duration,

    /// Fail rule application when any router is disconnected
    pub fail_when_disconnected: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command_timeout: duration_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            migration_step_timeout: duration_secs(DEFAULT_MIGRATION_STEP_TIMEOUT_SECS),
            fail_when_disconnected: false,
        }
    }
}

impl AgentConfig {
    /// Load from environment variables
    pub fn from_env() -> NetplaneResult<Self> {
        let mut config = Self::default();
        config.command_timeout =
            parse_duration_secs_from_env("NETPLANE_COMMAND_TIMEOUT_SECS", config.command_timeout);
        config.migration_step_timeout = parse_duration_secs_from_env(
            "NETPLANE_MIGRATION_STEP_TIMEOUT_SECS",
            config.migration_step_timeout,
        );
        if let Ok(value) = std::env::var("NETPLANE_FAIL_WHEN_DISCONNECTED") {
            config.fail_when_disconnected = matches!(value.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> NetplaneResult<()> {
        if self.command_timeout.is_zero() || self.migration_step_timeout.is_zero() {
            return Err(NetplaneError::configuration(
                "agent",
                "command timeouts must be non-zero",
            ));
        }
        Ok(())
    }
}
