//! Table definitions of the shared store
//!
//! Records are bincode-encoded and keyed by their internal id. Lock rows are
//! keyed by lock name, sequences by sequence name.

use redb::TableDefinition;

// Entity tables
pub const VM_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vm_instances");
pub const VOLUME_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("volumes");
pub const HOST_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("hosts");
pub const STORAGE_POOL_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("storage_pools");
pub const STATIC_ROUTE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("static_routes");
pub const NETWORK_ACL_ITEM_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("network_acl_items");
pub const AFFINITY_GROUP_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("affinity_groups");

// Async job tables
pub const JOB_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("async_jobs");
pub const JOIN_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("async_job_joins");
/// Pending (non-terminal) job ids per queue, oldest first
pub const JOB_QUEUE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("async_job_queues");

// VM work records
pub const WORK_RECORD_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("vm_work_records");

// Keyed tables
pub const LOCK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("global_locks");
pub const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub(crate) const KEYED_TABLES: &[TableDefinition<&str, &[u8]>] = &[LOCK_TABLE, JOB_QUEUE_TABLE];

pub(crate) const ID_TABLES: &[TableDefinition<u64, &[u8]>] = &[
    VM_TABLE,
    VOLUME_TABLE,
    HOST_TABLE,
    STORAGE_POOL_TABLE,
    STATIC_ROUTE_TABLE,
    NETWORK_ACL_ITEM_TABLE,
    AFFINITY_GROUP_TABLE,
    JOB_TABLE,
    JOIN_TABLE,
    WORK_RECORD_TABLE,
];
