use super::manager::{VirtualMachineManager, VM_WORK_DISPATCHER};
use super::work::VmWork;
use crate::error::{NetplaneError, NetplaneResult};
use crate::jobs::{AsyncJob, JobContext, JobDispatcher, JobOutcome};
use async_trait::async_trait;
use std::sync::Weak;
use tracing::debug;

/// Runs [`VmWork`] jobs taken from the VM work queue
pub struct VmWorkJobDispatcher {
    manager: Weak<VirtualMachineManager>,
}

impl VmWorkJobDispatcher {
    pub fn new(manager: Weak<VirtualMachineManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl JobDispatcher for VmWorkJobDispatcher {
    fn name(&self) -> &str {
        VM_WORK_DISPATCHER
    }

    async fn run_job(&self, ctx: JobContext, job: AsyncJob) -> NetplaneResult<JobOutcome> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| NetplaneError::NotInitialized {
                component: "virtual machine manager".to_string(),
            })?;

        let work: VmWork = job.cmd_info()?;
        debug!(job_id = %job.id, vm = %work.vm_id(), command = work.command_name(), "Dispatching VM work");
        ctx.set_step(work.command_name())?;

        let result = manager.run_work(work, Some(ctx.job_id())).await?;
        JobOutcome::completed(&result)
    }
}
