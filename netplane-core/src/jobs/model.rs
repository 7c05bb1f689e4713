use crate::error::{ErrorCategory, NetplaneError, NetplaneResult};
use crate::storage::tables::{JOB_TABLE, JOIN_TABLE};
use crate::storage::Record;
use crate::types::{new_uuid, JobId};
use chrono::{DateTime, Utc};
use redb::TableDefinition;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of an async job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    InProgress,
    /// Joined on `waiting_on`; resumed by the wake-up poller
    Suspended { waiting_on: JobId },
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Created => write!(f, "Created"),
            JobStatus::InProgress => write!(f, "InProgress"),
            JobStatus::Suspended { waiting_on } => write!(f, "Suspended({})", waiting_on),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Serialization queue: at most one running job per `(name, resource_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    pub name: String,
    pub resource_id: u64,
}

impl QueueKey {
    pub fn new(name: impl Into<String>, resource_id: u64) -> Self {
        Self {
            name: name.into(),
            resource_id,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.resource_id)
    }
}

/// Durable job record. Never deleted; terminal jobs are the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJob {
    pub id: JobId,
    pub uuid: String,
    pub related_job_id: Option<JobId>,
    /// Name of the dispatcher that runs the job
    pub dispatcher: String,
    pub command: String,
    /// JSON payload handed to the dispatcher
    pub cmd_info: String,
    pub account_id: u64,
    pub user_id: u64,
    pub status: JobStatus,
    pub step: Option<String>,
    /// JSON result on success, serialized [`JobFailure`] on failure
    pub result: Option<String>,
    pub instance_type: Option<String>,
    pub instance_id: Option<u64>,
    pub queue: Option<QueueKey>,
    /// Management server currently executing the job
    pub owner_node: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AsyncJob {
    pub(crate) fn from_request(id: JobId, request: JobRequest, queue: Option<QueueKey>) -> Self {
        let now = Utc::now();
        Self {
            id,
            uuid: new_uuid(),
            related_job_id: request.related_job_id,
            dispatcher: request.dispatcher,
            command: request.command,
            cmd_info: request.cmd_info,
            account_id: request.account_id,
            user_id: request.user_id,
            status: JobStatus::Created,
            step: None,
            result: None,
            instance_type: request.instance_type,
            instance_id: request.instance_id,
            queue,
            owner_node: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Decode `cmd_info`
    pub fn cmd_info<T: DeserializeOwned>(&self) -> NetplaneResult<T> {
        serde_json::from_str(&self.cmd_info)
            .map_err(|e| NetplaneError::serialization(format!("decode cmd_info of {}", self.id), e))
    }

    /// Decode a successful result
    pub fn result_as<T: DeserializeOwned>(&self) -> NetplaneResult<Option<T>> {
        match (&self.status, &self.result) {
            (JobStatus::Succeeded, Some(result)) => serde_json::from_str(result)
                .map(Some)
                .map_err(|e| NetplaneError::serialization(format!("decode result of {}", self.id), e)),
            _ => Ok(None),
        }
    }

    /// Decode the failure captured for a failed job
    pub fn failure(&self) -> Option<JobFailure> {
        match (&self.status, &self.result) {
            (JobStatus::Failed, Some(result)) => serde_json::from_str(result).ok(),
            _ => None,
        }
    }
}

impl Record for AsyncJob {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = JOB_TABLE;
    const KIND: &'static str = "async job";

    fn key(&self) -> u64 {
        self.id.0
    }
}

/// What a caller asks the job store to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub dispatcher: String,
    pub command: String,
    pub cmd_info: String,
    pub account_id: u64,
    pub user_id: u64,
    pub instance_type: Option<String>,
    pub instance_id: Option<u64>,
    pub related_job_id: Option<JobId>,
}

impl JobRequest {
    pub fn new(dispatcher: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            dispatcher: dispatcher.into(),
            command: command.into(),
            cmd_info: "null".to_string(),
            account_id: 0,
            user_id: 0,
            instance_type: None,
            instance_id: None,
            related_job_id: None,
        }
    }

    pub fn with_cmd_info<T: Serialize>(mut self, info: &T) -> NetplaneResult<Self> {
        self.cmd_info = serde_json::to_string(info)
            .map_err(|e| NetplaneError::serialization("encode cmd_info", e))?;
        Ok(self)
    }

    pub fn for_instance(mut self, instance_type: impl Into<String>, instance_id: u64) -> Self {
        self.instance_type = Some(instance_type.into());
        self.instance_id = Some(instance_id);
        self
    }

    pub fn account(mut self, account_id: u64, user_id: u64) -> Self {
        self.account_id = account_id;
        self.user_id = user_id;
        self
    }

    pub fn related_to(mut self, job_id: JobId) -> Self {
        self.related_job_id = Some(job_id);
        self
    }
}

/// Failure captured in a failed job's `result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&NetplaneError> for JobFailure {
    fn from(error: &NetplaneError) -> Self {
        Self {
            category: error.category(),
            message: error.to_string(),
        }
    }
}

/// Persisted join of a parent job on a child; keyed by the parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRecord {
    pub parent: JobId,
    pub child: JobId,
    pub wakeup_handler: String,
    pub wakeup_dispatcher: String,
    pub interval_ms: u64,
    /// Unix milliseconds after which the parent resumes with a timeout
    pub deadline_ms: u64,
    pub next_check_ms: u64,
    /// Set once the parent's dispatcher has returned `Suspended`; the poller
    /// never resumes a parent that is still executing
    pub armed: bool,
}

impl JoinRecord {
    pub fn new(
        parent: JobId,
        child: JobId,
        wakeup_handler: impl Into<String>,
        wakeup_dispatcher: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        now_ms: u64,
    ) -> Self {
        Self {
            parent,
            child,
            wakeup_handler: wakeup_handler.into(),
            wakeup_dispatcher: wakeup_dispatcher.into(),
            interval_ms: interval.as_millis() as u64,
            deadline_ms: now_ms.saturating_add(timeout.as_millis() as u64),
            next_check_ms: now_ms,
            armed: false,
        }
    }
}

impl Record for JoinRecord {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = JOIN_TABLE;
    const KIND: &'static str = "job join";

    fn key(&self) -> u64 {
        self.parent.0
    }
}
