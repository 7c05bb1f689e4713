//! Network topologies
//!
//! A topology is the per-zone-type strategy deciding which rule categories
//! exist and how their commands are built. [`NetworkTopologyContext`] holds
//! exactly one topology per [`NetworkType`](crate::types::NetworkType);
//! topologies are stateless and shared across tasks.

mod apply;
mod context;
mod topologies;
mod visitor;

pub use apply::{ApplyStatus, RouterApplyResult, RuleApplyReport};
pub use context::NetworkTopologyContext;
pub use topologies::{AdvancedNetworkTopology, BasicNetworkTopology};
pub use visitor::{AdvancedNetworkVisitor, BasicNetworkVisitor, NetworkTopologyVisitor};

use crate::agent::AgentManager;
use crate::error::{NetplaneError, NetplaneResult};
use crate::rules::*;
use crate::types::{Network, NetworkType, Nic, VirtualRouter};
use async_trait::async_trait;

/// Rule-application API consumed by network orchestration
#[async_trait]
pub trait NetworkTopology: Send + Sync {
    fn network_type(&self) -> NetworkType;

    fn visitor(&self) -> &dyn NetworkTopologyVisitor;

    fn agents(&self) -> &AgentManager;

    /// Apply `rules` on the routers backing `network`
    async fn apply_rules(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        rule_type: &str,
        fail_when_disconnected: bool,
        rules: RuleSet,
    ) -> NetplaneResult<RuleApplyReport> {
        if network.network_type != self.network_type() {
            return Err(NetplaneError::invalid_operation(
                rule_type,
                format!(
                    "{} is a {} network, topology handles {}",
                    network.id,
                    network.network_type,
                    self.network_type()
                ),
            ));
        }
        apply::apply_to_routers(
            self.visitor(),
            self.agents(),
            network,
            routers,
            rule_type,
            fail_when_disconnected,
            &rules,
        )
        .await
    }

    async fn apply_static_nats(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        rules: Vec<StaticNatRule>,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::StaticNat(StaticNatRules {
            network: network.clone(),
            rules,
        });
        self.apply_with_defaults(network, routers, "static nat rules", bundle)
            .await
    }

    async fn apply_load_balancing_rules(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        rules: Vec<LoadBalancingRule>,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::LoadBalancing(LoadBalancingRules {
            network: network.clone(),
            rules,
        });
        self.apply_with_defaults(network, routers, "lb rules", bundle)
            .await
    }

    async fn apply_firewall_rules(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        rules: Vec<FirewallRule>,
        lb_rules: Vec<LoadBalancingRule>,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::Firewall(FirewallRules {
            network: network.clone(),
            rules,
            lb_rules,
        });
        self.apply_with_defaults(network, routers, "firewall rules", bundle)
            .await
    }

    async fn associate_ip_addresses(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        ips: Vec<PublicIpAddress>,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::IpAssociation(IpAssociationRules {
            network: network.clone(),
            ips,
        });
        self.apply_with_defaults(network, routers, "ip association", bundle)
            .await
    }

    async fn apply_vpn_users(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        users: Vec<VpnUser>,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::Vpn(VpnRules {
            network: network.clone(),
            users,
        });
        self.apply_with_defaults(network, routers, "vpn users", bundle)
            .await
    }

    async fn apply_dhcp_entry(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        nic: &Nic,
        vm: &VmProfile,
        remove: bool,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::DhcpEntry(DhcpEntryRules {
            network: network.clone(),
            nic: nic.clone(),
            vm: vm.clone(),
            remove,
        });
        self.apply_with_defaults(network, routers, "dhcp entry", bundle)
            .await
    }

    async fn apply_userdata_and_password(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        nic: &Nic,
        vm: &VmProfile,
        zone: &ZoneMetadata,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::UserdataPwd(UserdataPwdRules {
            network: network.clone(),
            nic: nic.clone(),
            vm: vm.clone(),
            zone: zone.clone(),
        });
        self.apply_with_defaults(network, routers, "userdata and password entry", bundle)
            .await
    }

    async fn save_password_to_router(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        nic: &Nic,
        vm: &VmProfile,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::PasswordToRouter(PasswordToRouterRules {
            network: network.clone(),
            nic: nic.clone(),
            vm: vm.clone(),
        });
        self.apply_with_defaults(network, routers, "save password entry", bundle)
            .await
    }

    async fn save_userdata_to_router(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        nic: &Nic,
        vm: &VmProfile,
        zone: &ZoneMetadata,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::UserdataToRouter(UserdataToRouterRules {
            network: network.clone(),
            nic: nic.clone(),
            vm: vm.clone(),
            zone: zone.clone(),
        });
        self.apply_with_defaults(network, routers, "save userdata entry", bundle)
            .await
    }

    async fn save_ssh_public_key(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        nic: &Nic,
        vm: &VmProfile,
        ssh_public_key: &str,
    ) -> NetplaneResult<RuleApplyReport> {
        let bundle = RuleSet::SshKeyToRouter(SshKeyToRouterRules {
            network: network.clone(),
            nic: nic.clone(),
            vm: vm.clone(),
            ssh_public_key: ssh_public_key.to_string(),
        });
        self.apply_with_defaults(network, routers, "save SSHkey entry", bundle)
            .await
    }

    /// `apply_rules` with the configured disconnected-router policy
    async fn apply_with_defaults(
        &self,
        network: &Network,
        routers: &[VirtualRouter],
        rule_type: &str,
        rules: RuleSet,
    ) -> NetplaneResult<RuleApplyReport> {
        let fail_when_disconnected = self.agents().config().fail_when_disconnected;
        self.apply_rules(network, routers, rule_type, fail_when_disconnected, rules)
            .await
    }
}
