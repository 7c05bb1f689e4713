//! Host agent commands and delivery
//!
//! The core never talks to hypervisors or routers directly; it hands typed
//! [`Command`]s to an [`AgentTransport`] through the [`AgentManager`], which
//! bounds every call with a timeout and executes batches in order.

mod commands;
mod manager;

pub use commands::{
    Answer, BatchAnswer, Command, CommandBatch, CommandResult, OnError, RouterAccess, VmSpec,
    VolumeMigration,
};
pub use manager::{AgentManager, AgentTransport};
