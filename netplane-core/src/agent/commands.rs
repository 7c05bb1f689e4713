use crate::error::ErrorCategory;
use crate::rules::{
    DhcpEntry, FirewallRule, LoadBalancingRule, PublicIpAddress, StaticNatRule, VmDataEntry,
    VpnUser,
};
use crate::types::{HostId, NetworkId, PoolId, RouterId, TrafficType, VolumeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the router reaches the command: control address and identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterAccess {
    pub router_id: RouterId,
    pub router_name: String,
    pub control_ip: String,
    pub guest_ip: String,
    pub network_id: NetworkId,
}

/// Placement of one volume during a storage live migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMigration {
    pub volume_id: VolumeId,
    pub volume_uuid: String,
    pub source_pool: PoolId,
    pub dest_pool: PoolId,
}

/// Minimal VM description carried by VM commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub uuid: String,
    pub cpu: u32,
    pub speed_mhz: u32,
    pub memory_mb: u32,
}

/// Command understood by a host agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    SetStaticNatRules {
        router: RouterAccess,
        rules: Vec<StaticNatRule>,
    },
    LoadBalancerConfig {
        router: RouterAccess,
        rules: Vec<LoadBalancingRule>,
    },
    SetFirewallRules {
        router: RouterAccess,
        traffic: TrafficType,
        rules: Vec<FirewallRule>,
    },
    SetPortForwardingRules {
        router: RouterAccess,
        rules: Vec<FirewallRule>,
    },
    IpAssoc {
        router: RouterAccess,
        vlan: Option<u32>,
        ips: Vec<PublicIpAddress>,
    },
    VpnUsersCfg {
        router: RouterAccess,
        users: Vec<VpnUser>,
    },
    SavePassword {
        router: RouterAccess,
        vm_ip: String,
        vm_name: String,
        password: String,
    },
    VmData {
        router: RouterAccess,
        vm_ip: String,
        vm_name: String,
        entries: Vec<VmDataEntry>,
    },
    DhcpEntry {
        router: RouterAccess,
        entry: DhcpEntry,
    },
    PrepareForMigration {
        vm: VmSpec,
    },
    MigrateWithStorageReceive {
        vm: VmSpec,
        volumes: Vec<VolumeMigration>,
    },
    MigrateWithStorageSend {
        vm: VmSpec,
        dest_host: HostId,
        volumes: Vec<VolumeMigration>,
    },
    MigrateWithStorageComplete {
        vm: VmSpec,
        volumes: Vec<VolumeMigration>,
    },
    CheckVirtualMachine {
        vm_name: String,
    },
    ScaleVm {
        vm: VmSpec,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetStaticNatRules { .. } => "SetStaticNatRules",
            Command::LoadBalancerConfig { .. } => "LoadBalancerConfig",
            Command::SetFirewallRules { .. } => "SetFirewallRules",
            Command::SetPortForwardingRules { .. } => "SetPortForwardingRules",
            Command::IpAssoc { .. } => "IpAssoc",
            Command::VpnUsersCfg { .. } => "VpnUsersCfg",
            Command::SavePassword { .. } => "SavePassword",
            Command::VmData { .. } => "VmData",
            Command::DhcpEntry { .. } => "DhcpEntry",
            Command::PrepareForMigration { .. } => "PrepareForMigration",
            Command::MigrateWithStorageReceive { .. } => "MigrateWithStorageReceive",
            Command::MigrateWithStorageSend { .. } => "MigrateWithStorageSend",
            Command::MigrateWithStorageComplete { .. } => "MigrateWithStorageComplete",
            Command::CheckVirtualMachine { .. } => "CheckVirtualMachine",
            Command::ScaleVm { .. } => "ScaleVm",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Agent reply to one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub success: bool,
    pub details: Option<String>,
}

impl Answer {
    pub fn ok() -> Self {
        Self {
            success: true,
            details: None,
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
        }
    }
}

/// Behaviour of a batch after a command is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnError {
    /// Keep sending the remaining commands
    Continue,
    /// Skip every remaining command
    Stop,
}

/// Ordered commands for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    pub on_error: OnError,
}

impl CommandBatch {
    pub fn new(on_error: OnError) -> Self {
        Self {
            commands: Vec::new(),
            on_error,
        }
    }

    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Answer of one command inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub index: usize,
    pub command: String,
    pub answer: Answer,
    /// Set when the agent never answered (timeout, lost connection)
    #[serde(default)]
    pub error: Option<ErrorCategory>,
}

impl CommandResult {
    pub fn is_undelivered(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of a batch on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAnswer {
    pub target: HostId,
    pub results: Vec<CommandResult>,
    /// Commands never sent because an earlier one failed under `OnError::Stop`
    pub skipped: Vec<String>,
}

impl BatchAnswer {
    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty() && self.results.iter().all(|r| r.answer.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| !r.answer.success)
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.answer.success).count()
    }

    /// Commands that got no answer from the agent
    pub fn undelivered(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| r.is_undelivered())
    }
}
