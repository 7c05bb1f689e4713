//! Rule bundles
//!
//! A [`RuleSet`] is an immutable snapshot of intended router configuration
//! for one network. Bundles never touch shared state; topologies turn them
//! into command batches (see [`commands`]) and hand those to the agents, so a
//! bundle can be replayed when a router was unreachable.

pub mod commands;
pub mod model;

pub use model::*;

use crate::error::{NetplaneError, NetplaneResult};
use crate::types::{Network, NetworkAclItem, Nic};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticNatRules {
    pub network: Network,
    pub rules: Vec<StaticNatRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingRules {
    pub network: Network,
    pub rules: Vec<LoadBalancingRule>,
}

/// Firewall-family rules; all rules share one purpose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRules {
    pub network: Network,
    pub rules: Vec<FirewallRule>,
    /// Load balancer definitions, used when the purpose is `LoadBalancing`
    pub lb_rules: Vec<LoadBalancingRule>,
}

impl FirewallRules {
    /// Purpose of the bundle, `None` when it carries no rules.
    ///
    /// Mixed purposes are a validation error.
    pub fn purpose(&self) -> NetplaneResult<Option<Purpose>> {
        let Some(first) = self.rules.first() else {
            return Ok(None);
        };
        if let Some(other) = self.rules.iter().find(|rule| rule.purpose != first.purpose) {
            return Err(NetplaneError::validation(
                "rules.purpose",
                format!(
                    "rule {} is {:?} but the bundle is {:?}",
                    other.id, other.purpose, first.purpose
                ),
            ));
        }
        Ok(Some(first.purpose))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAssociationRules {
    pub network: Network,
    pub ips: Vec<PublicIpAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnRules {
    pub network: Network,
    pub users: Vec<VpnUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpEntryRules {
    pub network: Network,
    pub nic: Nic,
    pub vm: VmProfile,
    /// Remove the reservation instead of adding it
    pub remove: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserdataPwdRules {
    pub network: Network,
    pub nic: Nic,
    pub vm: VmProfile,
    pub zone: ZoneMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserdataToRouterRules {
    pub network: Network,
    pub nic: Nic,
    pub vm: VmProfile,
    pub zone: ZoneMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordToRouterRules {
    pub network: Network,
    pub nic: Nic,
    pub vm: VmProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyToRouterRules {
    pub network: Network,
    pub nic: Nic,
    pub vm: VmProfile,
    pub ssh_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpPvlanRules {
    pub network: Network,
    pub nic: Nic,
    pub add: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpSubnetRules {
    pub network: Network,
    pub nic: Nic,
    pub vm: VmProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateGatewayRules {
    pub network: Network,
    pub gateway: PrivateGateway,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcIpAssociationRules {
    pub network: Network,
    pub ips: Vec<PublicIpAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAclsRules {
    pub network: Network,
    pub items: Vec<NetworkAclItem>,
    pub is_private_gateway: bool,
}

/// Closed set of rule categories a topology may be asked to apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleSet {
    StaticNat(StaticNatRules),
    LoadBalancing(LoadBalancingRules),
    Firewall(FirewallRules),
    IpAssociation(IpAssociationRules),
    Vpn(VpnRules),
    DhcpEntry(DhcpEntryRules),
    UserdataPwd(UserdataPwdRules),
    UserdataToRouter(UserdataToRouterRules),
    PasswordToRouter(PasswordToRouterRules),
    SshKeyToRouter(SshKeyToRouterRules),
    DhcpPvlan(DhcpPvlanRules),
    DhcpSubnet(DhcpSubnetRules),
    PrivateGateway(PrivateGatewayRules),
    VpcIpAssociation(VpcIpAssociationRules),
    NetworkAcls(NetworkAclsRules),
}

/// Tag of a [`RuleSet`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCategory {
    StaticNat,
    LoadBalancing,
    Firewall,
    IpAssociation,
    Vpn,
    DhcpEntry,
    UserdataPwd,
    UserdataToRouter,
    PasswordToRouter,
    SshKeyToRouter,
    DhcpPvlan,
    DhcpSubnet,
    PrivateGateway,
    VpcIpAssociation,
    NetworkAcls,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl RuleSet {
    pub fn category(&self) -> RuleCategory {
        match self {
            RuleSet::StaticNat(_) => RuleCategory::StaticNat,
            RuleSet::LoadBalancing(_) => RuleCategory::LoadBalancing,
            RuleSet::Firewall(_) => RuleCategory::Firewall,
            RuleSet::IpAssociation(_) => RuleCategory::IpAssociation,
            RuleSet::Vpn(_) => RuleCategory::Vpn,
            RuleSet::DhcpEntry(_) => RuleCategory::DhcpEntry,
            RuleSet::UserdataPwd(_) => RuleCategory::UserdataPwd,
            RuleSet::UserdataToRouter(_) => RuleCategory::UserdataToRouter,
            RuleSet::PasswordToRouter(_) => RuleCategory::PasswordToRouter,
            RuleSet::SshKeyToRouter(_) => RuleCategory::SshKeyToRouter,
            RuleSet::DhcpPvlan(_) => RuleCategory::DhcpPvlan,
            RuleSet::DhcpSubnet(_) => RuleCategory::DhcpSubnet,
            RuleSet::PrivateGateway(_) => RuleCategory::PrivateGateway,
            RuleSet::VpcIpAssociation(_) => RuleCategory::VpcIpAssociation,
            RuleSet::NetworkAcls(_) => RuleCategory::NetworkAcls,
        }
    }

    /// Network the bundle targets
    pub fn network(&self) -> &Network {
        match self {
            RuleSet::StaticNat(r) => &r.network,
            RuleSet::LoadBalancing(r) => &r.network,
            RuleSet::Firewall(r) => &r.network,
            RuleSet::IpAssociation(r) => &r.network,
            RuleSet::Vpn(r) => &r.network,
            RuleSet::DhcpEntry(r) => &r.network,
            RuleSet::UserdataPwd(r) => &r.network,
            RuleSet::UserdataToRouter(r) => &r.network,
            RuleSet::PasswordToRouter(r) => &r.network,
            RuleSet::SshKeyToRouter(r) => &r.network,
            RuleSet::DhcpPvlan(r) => &r.network,
            RuleSet::DhcpSubnet(r) => &r.network,
            RuleSet::PrivateGateway(r) => &r.network,
            RuleSet::VpcIpAssociation(r) => &r.network,
            RuleSet::NetworkAcls(r) => &r.network,
        }
    }
}
