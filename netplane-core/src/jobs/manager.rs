use super::dispatcher::{DispatcherRegistry, JobContext, JobDispatcher, JobOutcome, JoinOutcome};
use super::model::{AsyncJob, JobFailure, JobRequest, JobStatus, JoinRecord, QueueKey};
use crate::config::JobConfig;
use crate::error::{NetplaneError, NetplaneResult};
use crate::storage::tables::JOB_QUEUE_TABLE;
use crate::storage::{Store, StoreTxn};
use crate::types::JobId;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const JOB_SEQUENCE: &str = "async_job";

enum Execution {
    Run,
    Wakeup {
        handler: String,
        dispatcher: String,
        outcome: JoinOutcome,
    },
}

/// Counts reported by [`AsyncJobManager::recover`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed: usize,
    pub rearmed: usize,
    pub rescheduled: usize,
}

/// Durable async job store and executor for one management-server node
pub struct AsyncJobManager {
    node_id: u64,
    store: Store,
    config: JobConfig,
    registry: DispatcherRegistry,
    permits: Arc<Semaphore>,
    completed: Notify,
    wakeup: Notify,
    shutdown: watch::Sender<bool>,
}

impl AsyncJobManager {
    pub fn new(node_id: u64, store: Store, config: JobConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            node_id,
            store,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            registry: DispatcherRegistry::new(),
            completed: Notify::new(),
            wakeup: Notify::new(),
            shutdown,
        })
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn register_dispatcher(&self, dispatcher: Arc<dyn JobDispatcher>) {
        info!(dispatcher = dispatcher.name(), "Registered job dispatcher");
        self.registry.register(dispatcher);
    }

    pub fn dispatchers(&self) -> &DispatcherRegistry {
        &self.registry
    }

    /// Submit a job that is not serialized behind any other job
    pub fn submit(self: &Arc<Self>, request: JobRequest) -> NetplaneResult<JobId> {
        self.enqueue(request, None)
    }

    /// Submit a job on the queue `(queue_name, resource_id)`.
    ///
    /// Jobs sharing a queue run one at a time in submission order.
    pub fn submit_async_job(
        self: &Arc<Self>,
        request: JobRequest,
        queue_name: &str,
        resource_id: u64,
    ) -> NetplaneResult<JobId> {
        self.enqueue(request, Some(QueueKey::new(queue_name, resource_id)))
    }

    fn enqueue(self: &Arc<Self>, request: JobRequest, queue: Option<QueueKey>) -> NetplaneResult<JobId> {
        if request.dispatcher.is_empty() {
            return Err(NetplaneError::validation("dispatcher", "dispatcher name is required"));
        }

        let job = self.store.write("submit async job", |txn| {
            let id = JobId(txn.next_id(JOB_SEQUENCE)?);
            let job = AsyncJob::from_request(id, request, queue);
            txn.persist(&job)?;
            if let Some(queue) = &job.queue {
                let key = queue.to_string();
                let mut pending: Vec<JobId> =
                    txn.find_keyed(JOB_QUEUE_TABLE, &key)?.unwrap_or_default();
                pending.push(id);
                txn.put_keyed(JOB_QUEUE_TABLE, &key, &pending)?;
            }
            Ok(job)
        })?;
        let id = job.id;
        info!(
            job_id = %id,
            dispatcher = %job.dispatcher,
            command = %job.command,
            queue = ?job.queue.as_ref().map(|q| q.to_string()),
            "Submitted async job"
        );

        self.schedule(&job)?;
        Ok(id)
    }

    /// Start `job` unless it has to wait for an earlier job on its queue
    fn schedule(self: &Arc<Self>, job: &AsyncJob) -> NetplaneResult<()> {
        if let Some(queue) = &job.queue {
            if let Some(head) = self.queue_head(queue)? {
                if head.id != job.id {
                    debug!(job_id = %job.id, queue = %queue, running = %head.id, "Job queued behind earlier job");
                    return Ok(());
                }
            }
        }
        self.claim(job.id)
    }

    /// Non-terminal jobs of a queue, oldest first
    pub fn pending_jobs(&self, queue: &QueueKey) -> NetplaneResult<Vec<JobId>> {
        Ok(self
            .store
            .find_keyed(JOB_QUEUE_TABLE, &queue.to_string())?
            .unwrap_or_default())
    }

    /// Oldest non-terminal job of a queue
    fn queue_head(&self, queue: &QueueKey) -> NetplaneResult<Option<AsyncJob>> {
        match self.pending_jobs(queue)?.first() {
            Some(id) => self.store.find(id.0),
            None => Ok(None),
        }
    }

    fn schedule_queue(self: &Arc<Self>, queue: &QueueKey) -> NetplaneResult<()> {
        if let Some(head) = self.queue_head(queue)? {
            if head.status == JobStatus::Created {
                self.claim(head.id)?;
            }
        }
        Ok(())
    }

    /// Claim a `Created` job for this node and run it
    fn claim(self: &Arc<Self>, job_id: JobId) -> NetplaneResult<()> {
        let node_id = self.node_id;
        let claimed = self.store.update_if::<AsyncJob, _>(job_id.0, |job| {
            if job.status != JobStatus::Created {
                return false;
            }
            job.status = JobStatus::InProgress;
            job.owner_node = Some(node_id);
            job.updated_at = Utc::now();
            true
        })?;

        if let Some(job) = claimed {
            debug!(job_id = %job_id, node_id, "Job claimed");
            self.spawn_execution(job, Execution::Run);
        }
        Ok(())
    }

    fn spawn_execution(self: &Arc<Self>, job: AsyncJob, execution: Execution) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = job.id;
            let result = manager.execute(job, execution).await;
            if let Err(e) = manager.finish(job_id, result) {
                error!(job_id = %job_id, error = %e, "Failed to record job outcome");
            }
        });
    }

    async fn execute(
        self: &Arc<Self>,
        job: AsyncJob,
        execution: Execution,
    ) -> NetplaneResult<JobOutcome> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| NetplaneError::internal("job executor is shut down"))?;

        let dispatcher_name = match &execution {
            Execution::Run => job.dispatcher.clone(),
            Execution::Wakeup { dispatcher, .. } => dispatcher.clone(),
        };
        let dispatcher = self.registry.get(&dispatcher_name)?;
        let ctx = JobContext::new(Arc::clone(self), job.id);

        // Separate task so a panicking dispatcher only fails its own job
        let handle = tokio::spawn(async move {
            match execution {
                Execution::Run => dispatcher.run_job(ctx, job).await,
                Execution::Wakeup {
                    handler, outcome, ..
                } => dispatcher.wakeup(ctx, &handler, job, outcome).await,
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        }
    }

    fn finish(self: &Arc<Self>, job_id: JobId, result: NetplaneResult<JobOutcome>) -> NetplaneResult<()> {
        match result {
            Ok(JobOutcome::Completed(value)) => {
                self.complete(job_id, JobStatus::Succeeded, Some(value))
            }
            Ok(JobOutcome::Suspended) => {
                let armed = self.store.update_if::<JoinRecord, _>(job_id.0, |join| {
                    join.armed = true;
                    true
                })?;
                if armed.is_some() {
                    debug!(job_id = %job_id, "Job suspended on join");
                    self.wakeup.notify_one();
                    return Ok(());
                }
                let job = self.get_job(job_id)?;
                if job.status == JobStatus::InProgress {
                    let err = NetplaneError::internal("dispatcher suspended a job without joining");
                    return self.fail(job_id, &err);
                }
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, category = ?e.category(), "Job failed");
                self.fail(job_id, &e)
            }
        }
    }

    fn fail(self: &Arc<Self>, job_id: JobId, error: &NetplaneError) -> NetplaneResult<()> {
        let failure = serde_json::to_string(&JobFailure::from(error))
            .map_err(|e| NetplaneError::serialization("encode job failure", e))?;
        self.complete(job_id, JobStatus::Failed, Some(failure))
    }

    fn complete(
        self: &Arc<Self>,
        job_id: JobId,
        status: JobStatus,
        result: Option<String>,
    ) -> NetplaneResult<()> {
        let updated = self.store.write("complete async job", |txn| {
            let Some(mut job) = txn.find::<AsyncJob>(job_id.0)? else {
                return Ok(None);
            };
            if job.status.is_terminal() {
                return Ok(None);
            }
            let now = Utc::now();
            job.status = status;
            job.result = result;
            job.updated_at = now;
            job.completed_at = Some(now);
            txn.persist(&job)?;
            if let Some(queue) = &job.queue {
                dequeue(txn, queue, job.id)?;
            }
            Ok(Some(job))
        })?;

        let Some(job) = updated else {
            return Ok(());
        };
        info!(job_id = %job_id, status = %job.status, dispatcher = %job.dispatcher, "Job completed");

        self.completed.notify_waiters();
        self.wakeup.notify_one();
        if let Some(queue) = &job.queue {
            self.schedule_queue(queue)?;
        }
        Ok(())
    }

    pub(crate) fn update_step(&self, job_id: JobId, step: impl Into<String>) -> NetplaneResult<()> {
        let step = step.into();
        let updated = self.store.update_if::<AsyncJob, _>(job_id.0, |job| {
            job.step = Some(step);
            job.updated_at = Utc::now();
            true
        })?;
        if updated.is_none() {
            return Err(NetplaneError::not_found(format!("async job {}", job_id)));
        }
        Ok(())
    }

    /// Suspend `parent` until `child` is terminal or `timeout` elapses.
    ///
    /// On resumption `wakeup_dispatcher` is invoked with `wakeup_handler`
    /// and the parent reloaded from the store.
    pub fn join_job(
        &self,
        parent: JobId,
        child: JobId,
        wakeup_handler: &str,
        wakeup_dispatcher: &str,
        interval: Duration,
        timeout: Duration,
    ) -> NetplaneResult<()> {
        if parent == child {
            return Err(NetplaneError::validation("child", "a job cannot join itself"));
        }
        self.get_job(child)?;

        let suspended = self.store.update_if::<AsyncJob, _>(parent.0, |job| {
            if job.status != JobStatus::InProgress {
                return false;
            }
            job.status = JobStatus::Suspended { waiting_on: child };
            job.updated_at = Utc::now();
            true
        })?;
        if suspended.is_none() {
            return Err(NetplaneError::invalid_operation(
                "join",
                format!("job {} is not in progress", parent),
            ));
        }

        let interval = if interval.is_zero() {
            self.config.wakeup_interval
        } else {
            interval
        };
        let record = JoinRecord::new(
            parent,
            child,
            wakeup_handler,
            wakeup_dispatcher,
            interval,
            timeout,
            now_ms(),
        );
        self.store.persist(&record)?;
        debug!(parent = %parent, child = %child, handler = wakeup_handler, "Job joined");
        Ok(())
    }

    /// Resume every armed parent whose child is terminal or whose join deadline
    /// has passed. Returns the number of parents resumed by this node.
    pub fn poll_wakeups(self: &Arc<Self>) -> NetplaneResult<usize> {
        let now = now_ms();
        let mut resumed = 0;

        for join in self.store.list::<JoinRecord>()? {
            if !join.armed || now < join.next_check_ms {
                continue;
            }

            let child = self.store.find::<AsyncJob>(join.child.0)?;
            let outcome = match child {
                Some(child) if child.status.is_terminal() => JoinOutcome::Finished(child),
                _ if now >= join.deadline_ms => JoinOutcome::TimedOut { child: join.child },
                _ => {
                    self.store.update_if::<JoinRecord, _>(join.parent.0, |record| {
                        record.next_check_ms = now.saturating_add(record.interval_ms);
                        true
                    })?;
                    continue;
                }
            };

            // Removing the join claims the wake-up; only one node succeeds
            if !self.store.remove::<JoinRecord>(join.parent.0)? {
                continue;
            }

            let node_id = self.node_id;
            let waiting_on = join.child;
            let parent = self.store.update_if::<AsyncJob, _>(join.parent.0, |job| {
                if job.status != (JobStatus::Suspended { waiting_on }) {
                    return false;
                }
                job.status = JobStatus::InProgress;
                job.owner_node = Some(node_id);
                job.updated_at = Utc::now();
                true
            })?;

            let Some(parent) = parent else {
                warn!(parent = %join.parent, "Joined job is no longer suspended, dropping wake-up");
                continue;
            };

            if matches!(outcome, JoinOutcome::TimedOut { .. }) {
                warn!(parent = %join.parent, child = %join.child, "Join timed out");
            }
            debug!(parent = %join.parent, handler = %join.wakeup_handler, "Resuming joined job");
            self.spawn_execution(
                parent,
                Execution::Wakeup {
                    handler: join.wakeup_handler,
                    dispatcher: join.wakeup_dispatcher,
                    outcome,
                },
            );
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Startup recovery for this node.
    ///
    /// Jobs this node was running are failed, joins it owned are re-armed and
    /// queued `Created` jobs are scheduled again.
    pub fn recover(self: &Arc<Self>) -> NetplaneResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut created = Vec::new();

        for job in self.store.list::<AsyncJob>()? {
            match job.status {
                JobStatus::InProgress if job.owner_node == Some(self.node_id) => {
                    let err = NetplaneError::internal("interrupted by management server restart");
                    self.fail(job.id, &err)?;
                    report.failed += 1;
                }
                JobStatus::Suspended { .. } if job.owner_node == Some(self.node_id) => {
                    let rearmed = self.store.update_if::<JoinRecord, _>(job.id.0, |join| {
                        if join.armed {
                            return false;
                        }
                        join.armed = true;
                        true
                    })?;
                    if rearmed.is_some() {
                        report.rearmed += 1;
                    }
                }
                JobStatus::Created => created.push(job),
                _ => {}
            }
        }

        for job in &created {
            self.schedule(job)?;
            report.rescheduled += 1;
        }

        info!(
            node_id = self.node_id,
            failed = report.failed,
            rearmed = report.rearmed,
            rescheduled = report.rescheduled,
            "Async job recovery complete"
        );
        Ok(report)
    }

    /// Run recovery, then drive [`AsyncJobManager::poll_wakeups`] in the
    /// background until [`AsyncJobManager::shutdown`]
    pub fn start(self: &Arc<Self>) -> NetplaneResult<JoinHandle<()>> {
        self.recover()?;

        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        Ok(tokio::spawn(async move {
            let interval = manager.config.wakeup_interval;
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = manager.wakeup.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = manager.poll_wakeups() {
                    warn!(error = %e, "Job wake-up poll failed");
                }
            }
            info!(node_id = manager.node_id, "Job wake-up loop stopped");
        }))
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until `job_id` is terminal; `Timeout` if it is not within `timeout`
    pub async fn wait_for_completion(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> NetplaneResult<AsyncJob> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.get_job(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(NetplaneError::Timeout {
                    operation: format!("wait for {}", job_id),
                    duration: timeout,
                });
            }
            let poll = (deadline - now).min(self.config.wakeup_interval);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    pub fn get_job(&self, job_id: JobId) -> NetplaneResult<AsyncJob> {
        self.store.get(job_id.0)
    }

    pub fn find_job(&self, job_id: JobId) -> NetplaneResult<Option<AsyncJob>> {
        self.store.find(job_id.0)
    }

    pub fn list_jobs(&self) -> NetplaneResult<Vec<AsyncJob>> {
        self.store.list()
    }

    pub fn jobs_for_instance(&self, instance_type: &str, instance_id: u64) -> NetplaneResult<Vec<AsyncJob>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|job| {
                job.instance_type.as_deref() == Some(instance_type)
                    && job.instance_id == Some(instance_id)
            })
            .collect())
    }
}

fn dequeue(txn: &StoreTxn, queue: &QueueKey, job_id: JobId) -> NetplaneResult<()> {
    let key = queue.to_string();
    let mut pending: Vec<JobId> = txn.find_keyed(JOB_QUEUE_TABLE, &key)?.unwrap_or_default();
    pending.retain(|id| *id != job_id);
    if pending.is_empty() {
        txn.remove_keyed(JOB_QUEUE_TABLE, &key)?;
    } else {
        txn.put_keyed(JOB_QUEUE_TABLE, &key, &pending)?;
    }
    Ok(())
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
