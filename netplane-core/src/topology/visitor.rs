use crate::agent::{CommandBatch, OnError};
use crate::error::{NetplaneError, NetplaneResult};
use crate::rules::commands::*;
use crate::rules::{Purpose, RuleSet};
use crate::types::{NetworkType, VirtualRouter};

/// Builds the command batch for one rule bundle on one router.
///
/// Implementations match exhaustively on [`RuleSet`], so every category is
/// either built or rejected with `Unsupported`.
pub trait NetworkTopologyVisitor: Send + Sync {
    fn network_type(&self) -> NetworkType;

    fn visit(&self, router: &VirtualRouter, rules: &RuleSet) -> NetplaneResult<CommandBatch>;
}

fn unsupported(topology: NetworkType, rules: &RuleSet) -> NetplaneError {
    NetplaneError::unsupported(topology.to_string(), rules.category().to_string())
}

/// Basic zones: flat shared network without VPC concepts
#[derive(Debug, Default, Clone)]
pub struct BasicNetworkVisitor;

impl BasicNetworkVisitor {
    fn visit_firewall(
        &self,
        router: &VirtualRouter,
        rules: &crate::rules::FirewallRules,
    ) -> NetplaneResult<CommandBatch> {
        let network = &rules.network;
        match rules.purpose()? {
            None => Ok(CommandBatch::new(OnError::Continue)),
            Some(Purpose::Firewall) => Ok(create_apply_firewall_rules_commands(
                &rules.rules,
                router,
                network,
            )),
            Some(Purpose::PortForwarding) => Ok(create_apply_port_forwarding_commands(
                &rules.rules,
                router,
                network,
            )),
            Some(Purpose::StaticNat) => {
                create_apply_static_nat_from_firewall_commands(&rules.rules, router, network)
            }
            Some(Purpose::LoadBalancing) => Ok(create_apply_load_balancing_commands(
                &rules.lb_rules,
                router,
                network,
            )),
            Some(other @ (Purpose::Vpn | Purpose::NetworkAcl)) => Err(NetplaneError::unsupported(
                self.network_type().to_string(),
                format!("Firewall/{:?}", other),
            )),
        }
    }
}

impl NetworkTopologyVisitor for BasicNetworkVisitor {
    fn network_type(&self) -> NetworkType {
        NetworkType::Basic
    }

    fn visit(&self, router: &VirtualRouter, rules: &RuleSet) -> NetplaneResult<CommandBatch> {
        match rules {
            RuleSet::StaticNat(r) => Ok(create_apply_static_nat_commands(
                &r.rules, router, &r.network,
            )),
            RuleSet::LoadBalancing(r) => Ok(create_apply_load_balancing_commands(
                &r.rules, router, &r.network,
            )),
            RuleSet::Firewall(r) => self.visit_firewall(router, r),
            RuleSet::IpAssociation(r) => Ok(create_associate_ip_commands(
                &r.ips, router, &r.network,
            )),
            RuleSet::Vpn(r) => Ok(create_apply_vpn_users_command(
                &r.users, router, &r.network,
            )),
            RuleSet::DhcpEntry(r) => {
                if r.remove {
                    return Err(NetplaneError::invalid_operation(
                        "DhcpEntry",
                        "removing DHCP reservations is only supported in Advanced zones",
                    ));
                }
                Ok(CommandBatch::new(OnError::Stop).with(create_dhcp_entry_command(
                    router, &r.network, &r.vm, &r.nic,
                )))
            }
            RuleSet::UserdataPwd(r) => Ok(create_userdata_and_password_commands(
                router, &r.network, &r.vm, &r.nic, None,
            )),
            RuleSet::UserdataToRouter(r) => Ok(CommandBatch::new(OnError::Stop).with(
                create_vm_data_command(router, &r.network, &r.vm, &r.nic, Some(&r.zone)),
            )),
            RuleSet::PasswordToRouter(r) => {
                let mut batch = CommandBatch::new(OnError::Stop);
                if let Some(command) = create_password_command(router, &r.network, &r.vm, &r.nic)
                {
                    batch.push(command);
                }
                Ok(batch)
            }
            RuleSet::SshKeyToRouter(r) => Ok(create_ssh_key_commands(
                router,
                &r.network,
                &r.vm,
                &r.nic,
                &r.ssh_public_key,
            )),
            RuleSet::DhcpPvlan(_)
            | RuleSet::DhcpSubnet(_)
            | RuleSet::PrivateGateway(_)
            | RuleSet::VpcIpAssociation(_)
            | RuleSet::NetworkAcls(_) => Err(unsupported(self.network_type(), rules)),
        }
    }
}

/// Advanced zones: isolated guest networks with per-NIC DHCP and metadata
#[derive(Debug, Default, Clone)]
pub struct AdvancedNetworkVisitor {
    basic: BasicNetworkVisitor,
}

impl NetworkTopologyVisitor for AdvancedNetworkVisitor {
    fn network_type(&self) -> NetworkType {
        NetworkType::Advanced
    }

    fn visit(&self, router: &VirtualRouter, rules: &RuleSet) -> NetplaneResult<CommandBatch> {
        match rules {
            RuleSet::DhcpEntry(r) => Ok(CommandBatch::new(OnError::Stop).with(
                create_advanced_dhcp_entry_command(router, &r.network, &r.vm, &r.nic, r.remove),
            )),
            RuleSet::UserdataPwd(r) => {
                let mut batch = CommandBatch::new(OnError::Stop);
                // Passwords are only served on the default NIC
                if r.nic.is_default {
                    if let Some(command) =
                        create_password_command(router, &r.network, &r.vm, &r.nic)
                    {
                        batch.push(command);
                    }
                }
                batch.push(create_vm_data_command(
                    router,
                    &r.network,
                    &r.vm,
                    &r.nic,
                    Some(&r.zone),
                ));
                Ok(batch)
            }
            RuleSet::StaticNat(_)
            | RuleSet::LoadBalancing(_)
            | RuleSet::Firewall(_)
            | RuleSet::IpAssociation(_)
            | RuleSet::Vpn(_)
            | RuleSet::UserdataToRouter(_)
            | RuleSet::PasswordToRouter(_)
            | RuleSet::SshKeyToRouter(_) => self.basic.visit(router, rules),
            RuleSet::DhcpPvlan(_)
            | RuleSet::DhcpSubnet(_)
            | RuleSet::PrivateGateway(_)
            | RuleSet::VpcIpAssociation(_)
            | RuleSet::NetworkAcls(_) => Err(unsupported(self.network_type(), rules)),
        }
    }
}
