use super::manager::AsyncJobManager;
use super::model::{AsyncJob, JobRequest};
use crate::error::{NetplaneError, NetplaneResult};
use crate::types::JobId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a dispatcher invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Finished with a JSON result
    Completed(String),
    /// Joined on another job through [`JobContext::join`]; resumes via wake-up
    Suspended,
}

impl JobOutcome {
    pub fn completed<T: Serialize>(result: &T) -> NetplaneResult<Self> {
        serde_json::to_string(result)
            .map(JobOutcome::Completed)
            .map_err(|e| NetplaneError::serialization("encode job result", e))
    }
}

/// Why a joined parent is being woken up
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// The child reached a terminal status
    Finished(AsyncJob),
    /// The join deadline passed while the child was still running
    TimedOut { child: JobId },
}

/// Runs jobs addressed to it by name
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn run_job(&self, ctx: JobContext, job: AsyncJob) -> NetplaneResult<JobOutcome>;

    /// Resume a parent job after a join; `handler` is the name given at join time
    async fn wakeup(
        &self,
        ctx: JobContext,
        handler: &str,
        job: AsyncJob,
        outcome: JoinOutcome,
    ) -> NetplaneResult<JobOutcome> {
        let _ = (ctx, job, outcome);
        Err(NetplaneError::internal(format!(
            "dispatcher {} has no wake-up handler {}",
            self.name(),
            handler
        )))
    }
}

/// Dispatchers by name, filled once at startup
#[derive(Default)]
pub struct DispatcherRegistry {
    dispatchers: RwLock<HashMap<String, Arc<dyn JobDispatcher>>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dispatcher: Arc<dyn JobDispatcher>) {
        let name = dispatcher.name().to_string();
        self.dispatchers.write().insert(name, dispatcher);
    }

    pub fn get(&self, name: &str) -> NetplaneResult<Arc<dyn JobDispatcher>> {
        self.dispatchers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NetplaneError::UnknownDispatcher {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dispatchers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Handle given to a running dispatcher
#[derive(Clone)]
pub struct JobContext {
    manager: Arc<AsyncJobManager>,
    job_id: JobId,
}

impl JobContext {
    pub(crate) fn new(manager: Arc<AsyncJobManager>, job_id: JobId) -> Self {
        Self { manager, job_id }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn manager(&self) -> &Arc<AsyncJobManager> {
        &self.manager
    }

    /// Record a workflow marker on the running job
    pub fn set_step(&self, step: impl Into<String>) -> NetplaneResult<()> {
        self.manager.update_step(self.job_id, step)
    }

    /// Submit a child job linked back to this one
    pub fn submit_child(&self, request: JobRequest) -> NetplaneResult<JobId> {
        self.manager.submit(request.related_to(self.job_id))
    }

    /// Suspend this job until `child` terminates or `timeout` elapses.
    ///
    /// The dispatcher should return [`JobOutcome::Suspended`] right after.
    pub fn join(
        &self,
        child: JobId,
        wakeup_handler: &str,
        wakeup_dispatcher: &str,
        interval: Duration,
        timeout: Duration,
    ) -> NetplaneResult<()> {
        self.manager.join_job(
            self.job_id,
            child,
            wakeup_handler,
            wakeup_dispatcher,
            interval,
            timeout,
        )
    }
}
