//! Distributed lock configuration

use super::defaults::*;
use super::{parse_duration_from_env, parse_duration_secs_from_env};
use crate::error::{NetplaneError, NetplaneResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Distributed lock configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Wait bound used when a caller does not supply one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Lease after which a crashed holder's lock may be taken over
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,

    /// First backoff step while waiting for a contended lock
    #[serde(with = "humantime_serde")]
    pub min_poll_interval: Duration,

    /// Backoff ceiling while waiting for a contended lock
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: duration_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            lease_ttl: duration_secs(DEFAULT_LOCK_LEASE_TTL_SECS),
            min_poll_interval: duration_ms(DEFAULT_LOCK_MIN_POLL_MS),
            max_poll_interval: duration_ms(DEFAULT_LOCK_MAX_POLL_MS),
        }
    }
}

impl LockConfig {
    /// Load from environment variables
    pub fn from_env() -> NetplaneResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            default_timeout: parse_duration_secs_from_env(
                "NETPLANE_LOCK_TIMEOUT_SECS",
                defaults.default_timeout,
            ),
            lease_ttl: parse_duration_secs_from_env("NETPLANE_LOCK_LEASE_SECS", defaults.lease_ttl),
            min_poll_interval: parse_duration_from_env(
                "NETPLANE_LOCK_MIN_POLL_MS",
                defaults.min_poll_interval,
            ),
            max_poll_interval: parse_duration_from_env(
                "NETPLANE_LOCK_MAX_POLL_MS",
                defaults.max_poll_interval,
            ),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> NetplaneResult<()> {
        if self.lease_ttl.is_zero() {
            return Err(NetplaneError::configuration(
                "lock.lease_ttl",
                "lease must be non-zero",
            ));
        }
        if self.min_poll_interval.is_zero() || self.min_poll_interval > self.max_poll_interval {
            return Err(NetplaneError::configuration(
                "lock.min_poll_interval",
                "must be non-zero and not larger than max_poll_interval",
            ));
        }
        Ok(())
    }
}
