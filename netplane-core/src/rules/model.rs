//! Rule payloads carried by rule bundles and router commands

use crate::types::{NetworkId, TrafficType, VmId};
use serde::{Deserialize, Serialize};

/// What a firewall-style rule is for; selects the command family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    Firewall,
    PortForwarding,
    LoadBalancing,
    StaticNat,
    Vpn,
    NetworkAcl,
}

/// Public address plumbed on a router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpAddress {
    pub address: String,
    pub netmask: String,
    pub gateway: String,
    pub vlan: Option<u32>,
    pub mac: String,
    pub source_nat: bool,
    pub one_to_one_nat: bool,
    /// false releases the address
    pub add: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNatRule {
    pub id: u64,
    pub public_ip: String,
    pub vm_ip: String,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbDestination {
    pub ip: String,
    pub port: u16,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancingRule {
    pub id: u64,
    pub name: String,
    pub public_ip: String,
    pub public_port: u16,
    pub private_port: u16,
    pub protocol: String,
    pub algorithm: String,
    pub destinations: Vec<LbDestination>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: u64,
    pub purpose: Purpose,
    pub public_ip: Option<String>,
    pub protocol: String,
    pub port_start: Option<u16>,
    pub port_end: Option<u16>,
    pub source_cidrs: Vec<String>,
    pub traffic: TrafficType,
    /// Port forwarding / static NAT destination
    pub dest_ip: Option<String>,
    pub dest_port_start: Option<u16>,
    pub dest_port_end: Option<u16>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnUser {
    pub username: String,
    pub password: String,
    /// false removes the user
    pub add: bool,
}

/// Guest VM details needed for DHCP, password and metadata commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmProfile {
    pub id: VmId,
    pub uuid: String,
    pub name: String,
    pub host_name: String,
    pub service_offering: String,
    pub password: Option<String>,
    /// Base64 user data as provided by the tenant
    pub user_data: Option<String>,
    pub ssh_public_key: Option<String>,
    pub public_ip: Option<String>,
}

/// Zone details published through the metadata service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMetadata {
    pub zone_name: String,
    pub cloud_identifier: String,
    pub dns: Vec<String>,
}

/// One file served by the router's metadata service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDataEntry {
    pub folder: String,
    pub file: String,
    pub contents: String,
}

impl VmDataEntry {
    pub fn new(folder: &str, file: &str, contents: impl Into<String>) -> Self {
        Self {
            folder: folder.to_string(),
            file: file.to_string(),
            contents: contents.into(),
        }
    }
}

/// DHCP reservation pushed to a router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpEntry {
    pub vm_name: String,
    pub mac: String,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    /// DHCPv6 unique identifier derived from the MAC
    pub duid: Option<String>,
    pub gateway: Option<String>,
    pub default_router: bool,
    pub default_dns: bool,
    pub remove: bool,
}

/// Private gateway of a VPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateGateway {
    pub ip: String,
    pub gateway: String,
    pub netmask: String,
    pub vlan: u32,
    pub network_id: NetworkId,
}
