//! Durable async jobs
//!
//! Long-running operations are submitted as [`AsyncJob`] records and run by
//! a named [`JobDispatcher`]. Jobs on the same queue key run one at a time. A
//! job may join on another and is resumed by the wake-up poller, not by a
//! blocked task, so joins survive process restarts.
//!
//! ```text
//! Created ──▶ InProgress ──▶ Succeeded
//!                 │  ▲   └──▶ Failed
//!          join   ▼  │ wake-up
//!              Suspended
//! ```

mod dispatcher;
mod manager;
mod model;

pub use dispatcher::{DispatcherRegistry, JobContext, JobDispatcher, JobOutcome, JoinOutcome};
pub use manager::{AsyncJobManager, RecoveryReport};
pub use model::{AsyncJob, JobFailure, JobRequest, JobStatus, JoinRecord, QueueKey};
