//! Default configuration values for netplane
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Storage defaults
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_DB_FILE: &str = "netplane.redb";

// Distributed lock defaults
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_LOCK_LEASE_TTL_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_LOCK_MIN_POLL_MS: u64 = 10;
pub const DEFAULT_LOCK_MAX_POLL_MS: u64 = 250;

// Async job defaults
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 16;
pub const DEFAULT_WAKEUP_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 600; // 10 minutes
pub const DEFAULT_VM_WORK_QUEUE: &str = "VmWorkJobQueue";

// Agent transport defaults
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MIGRATION_STEP_TIMEOUT_SECS: u64 = 600;

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
