//! netplane core
//!
//! Control-plane core that turns tenant network intent into router commands
//! and tracks long-running VM operations:
//!
//! - [`state_machine`]: compare-and-swap entity transitions over static tables
//! - [`lock`]: named distributed locks with leases and fencing tokens
//! - [`jobs`]: durable async jobs with queues, joins and wake-ups
//! - [`rules`] and [`topology`]: rule bundles dispatched per zone network type
//! - [`vm`]: storage live migration and scaling workflow

pub mod agent;
pub mod config;
pub mod error;
pub mod jobs;
pub mod lock;
pub mod rules;
pub mod state_machine;
pub mod storage;
pub mod topology;
pub mod types;
pub mod vm;

pub use error::{NetplaneError, NetplaneResult};
pub use storage::Store;
