use crate::error::NetplaneResult;
use crate::state_machine::VmState;
use crate::storage::tables::WORK_RECORD_TABLE;
use crate::storage::{Record, Store};
use crate::types::{HostId, JobId, PoolId, ServiceOffering, VmId, VolumeId, WorkId};
use chrono::{DateTime, Utc};
use redb::TableDefinition;
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) const WORK_SEQUENCE: &str = "vm_work_record";

/// Progress marker of a multi-step VM operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkStep {
    Prepare,
    Migrating,
    Scaling,
    Done,
    RolledBack,
}

impl WorkStep {
    pub fn is_finished(&self) -> bool {
        matches!(self, WorkStep::Done | WorkStep::RolledBack)
    }
}

impl fmt::Display for WorkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Durable "operation in progress" marker for one VM.
///
/// Created before the first remote call and finished (`Done` or
/// `RolledBack`) only once the whole sequence has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub id: WorkId,
    pub vm_id: VmId,
    pub operation: String,
    pub step: WorkStep,
    pub owner_node: u64,
    pub job_id: Option<JobId>,
    /// Reason recorded when the work was rolled back
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for WorkRecord {
    const TABLE: TableDefinition<'static, u64, &'static [u8]> = WORK_RECORD_TABLE;
    const KIND: &'static str = "vm work record";

    fn key(&self) -> u64 {
        self.id.0
    }
}

impl WorkRecord {
    pub(crate) fn create(
        store: &Store,
        vm_id: VmId,
        operation: &str,
        step: WorkStep,
        owner_node: u64,
        job_id: Option<JobId>,
    ) -> NetplaneResult<Self> {
        let now = Utc::now();
        let record = Self {
            id: WorkId(store.next_id(WORK_SEQUENCE)?),
            vm_id,
            operation: operation.to_string(),
            step,
            owner_node,
            job_id,
            details: None,
            created_at: now,
            updated_at: now,
        };
        store.persist(&record)?;
        Ok(record)
    }

    /// Move an unfinished record to `step`; finished records are left alone
    pub(crate) fn advance(
        store: &Store,
        id: WorkId,
        step: WorkStep,
        details: Option<String>,
    ) -> NetplaneResult<Option<Self>> {
        store.update_if::<WorkRecord, _>(id.0, |record| {
            if record.step.is_finished() {
                return false;
            }
            record.step = step;
            if details.is_some() {
                record.details = details;
            }
            record.updated_at = Utc::now();
            true
        })
    }
}

/// A VM operation routed through the async job store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VmWork {
    MigrateWithStorage {
        vm_id: VmId,
        dest_host: HostId,
        /// Target pool per volume; volumes not listed stay where they are
        volume_to_pool: Vec<(VolumeId, PoolId)>,
    },
    Scale {
        vm_id: VmId,
        service_offering: ServiceOffering,
    },
}

impl VmWork {
    pub fn vm_id(&self) -> VmId {
        match self {
            VmWork::MigrateWithStorage { vm_id, .. } | VmWork::Scale { vm_id, .. } => *vm_id,
        }
    }

    /// Command name stored on the job record
    pub fn command_name(&self) -> &'static str {
        match self {
            VmWork::MigrateWithStorage { .. } => "VmWorkMigrateWithStorage",
            VmWork::Scale { .. } => "VmWorkScale",
        }
    }
}

/// Result payload of a finished VM work job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmWorkResult {
    pub vm_id: VmId,
    pub work_id: WorkId,
    pub state: VmState,
    pub host_id: Option<HostId>,
}
