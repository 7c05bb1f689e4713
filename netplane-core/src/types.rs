pub use crate::state_machine::{
    NetworkAclItemState, StaticRouteState, TransitionToken, VmState, VolumeState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Internal key of a VM instance
    VmId,
    "vm"
);
id_type!(
    /// Internal key of a hypervisor host (also the agent target id)
    HostId,
    "host"
);
id_type!(VolumeId, "vol");
id_type!(PoolId, "pool");
id_type!(NetworkId, "net");
id_type!(RouterId, "r");
id_type!(StaticRouteId, "route");
id_type!(AclItemId, "acl");
id_type!(AffinityGroupId, "affinity");
id_type!(
    /// Key of an async job record
    JobId,
    "job"
);
id_type!(WorkId, "work");

/// Externally visible identifier for new records
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Zone network type; selects the topology that applies rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    Basic,
    Advanced,
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Basic => write!(f, "Basic"),
            NetworkType::Advanced => write!(f, "Advanced"),
        }
    }
}

/// Hypervisor host as seen by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub cluster_id: u64,
    pub private_ip: String,
}

/// Where a primary storage pool is reachable from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolScope {
    Zone,
    Cluster(u64),
    /// Local disk of one host
    Host(HostId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: PoolId,
    pub name: String,
    pub scope: PoolScope,
}

impl StoragePool {
    pub fn is_local(&self) -> bool {
        matches!(self.scope, PoolScope::Host(_))
    }

    pub fn is_shared(&self) -> bool {
        !self.is_local()
    }

    /// Whether a VM running on `host` in `cluster_id` can use this pool
    pub fn is_reachable_from(&self, host: &Host) -> bool {
        match self.scope {
            PoolScope::Zone => true,
            PoolScope::Cluster(cluster) => cluster == host.cluster_id,
            PoolScope::Host(owner) => owner == host.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: u64,
    pub name: String,
    pub cpu: u32,
    pub speed_mhz: u32,
    pub memory_mb: u32,
    pub dynamic_scaling: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskOffering {
    pub id: u64,
    pub name: String,
    pub use_local_storage: bool,
}

/// A guest VM tracked by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInstance {
    pub id: VmId,
    pub uuid: String,
    pub name: String,
    pub account_id: u64,
    pub state: VmState,
    pub host_id: Option<HostId>,
    pub last_host_id: Option<HostId>,
    pub service_offering: ServiceOffering,
    /// Set while a migration between the two hosts is in flight
    pub pending_migration: Option<TransitionToken>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl VmInstance {
    pub fn new(id: VmId, name: impl Into<String>, offering: ServiceOffering) -> Self {
        Self {
            id,
            uuid: new_uuid(),
            name: name.into(),
            account_id: 0,
            state: VmState::Stopped,
            host_id: None,
            last_host_id: None,
            service_offering: offering,
            pending_migration: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub uuid: String,
    pub name: String,
    pub vm_id: Option<VmId>,
    pub pool_id: PoolId,
    pub disk_offering: DiskOffering,
    pub size_gb: u64,
    pub state: VolumeState,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub id: StaticRouteId,
    pub vpc_id: u64,
    pub cidr: String,
    pub gateway_ip: String,
    pub state: StaticRouteState,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficType {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAclItem {
    pub id: AclItemId,
    pub acl_id: u64,
    pub number: u32,
    pub cidrs: Vec<String>,
    pub protocol: String,
    pub port_start: Option<u16>,
    pub port_end: Option<u16>,
    pub action: AclAction,
    pub traffic: TrafficType,
    pub state: NetworkAclItemState,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityGroup {
    pub id: AffinityGroupId,
    pub name: String,
    pub members: Vec<VmId>,
}

/// Guest network that rules are applied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub uuid: String,
    pub name: String,
    pub zone_id: u64,
    pub zone_name: String,
    pub network_type: NetworkType,
    pub guest_cidr: String,
    pub gateway: String,
    pub vlan: Option<u32>,
    pub domain: String,
    pub vpc_id: Option<u64>,
}

/// Role a router plays inside a redundant pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundantState {
    Primary,
    Backup,
    Fault,
    Unknown,
}

/// Virtual router appliance backing one or more networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualRouter {
    pub id: RouterId,
    pub name: String,
    /// Host whose agent relays commands to this router
    pub host_id: Option<HostId>,
    pub state: VmState,
    pub is_redundant: bool,
    pub redundant_state: RedundantState,
    pub control_ip: String,
    pub guest_ip: String,
}

/// Network interface of a guest VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nic {
    pub id: u64,
    pub network_id: NetworkId,
    pub mac: String,
    pub ipv4: String,
    pub ipv6: Option<String>,
    pub netmask: String,
    pub gateway: String,
    pub is_default: bool,
}
