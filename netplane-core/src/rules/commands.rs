//! Pure command builders: `(rules, router, network) -> CommandBatch`

use super::model::*;
use crate::agent::{Command, CommandBatch, OnError, RouterAccess};
use crate::error::{NetplaneError, NetplaneResult};
use crate::types::{Network, Nic, TrafficType, VirtualRouter};
use std::collections::BTreeMap;

pub fn router_access(router: &VirtualRouter, network: &Network) -> RouterAccess {
    RouterAccess {
        router_id: router.id,
        router_name: router.name.clone(),
        control_ip: router.control_ip.clone(),
        guest_ip: router.guest_ip.clone(),
        network_id: network.id,
    }
}

pub fn create_apply_static_nat_commands(
    rules: &[StaticNatRule],
    router: &VirtualRouter,
    network: &Network,
) -> CommandBatch {
    let mut batch = CommandBatch::new(OnError::Continue);
    if !rules.is_empty() {
        batch.push(Command::SetStaticNatRules {
            router: router_access(router, network),
            rules: rules.to_vec(),
        });
    }
    batch
}

pub fn create_apply_load_balancing_commands(
    rules: &[LoadBalancingRule],
    router: &VirtualRouter,
    network: &Network,
) -> CommandBatch {
    // The router rewrites its whole haproxy config, so an empty list is still sent
    CommandBatch::new(OnError::Continue).with(Command::LoadBalancerConfig {
        router: router_access(router, network),
        rules: rules.to_vec(),
    })
}

/// Firewall rules go out as one command per traffic direction
pub fn create_apply_firewall_rules_commands(
    rules: &[FirewallRule],
    router: &VirtualRouter,
    network: &Network,
) -> CommandBatch {
    let mut batch = CommandBatch::new(OnError::Continue);
    for traffic in [TrafficType::Ingress, TrafficType::Egress] {
        let selected: Vec<FirewallRule> = rules
            .iter()
            .filter(|rule| rule.traffic == traffic)
            .cloned()
            .collect();
        if !selected.is_empty() {
            batch.push(Command::SetFirewallRules {
                router: router_access(router, network),
                traffic,
                rules: selected,
            });
        }
    }
    batch
}

pub fn create_apply_port_forwarding_commands(
    rules: &[FirewallRule],
    router: &VirtualRouter,
    network: &Network,
) -> CommandBatch {
    let mut batch = CommandBatch::new(OnError::Continue);
    if !rules.is_empty() {
        batch.push(Command::SetPortForwardingRules {
            router: router_access(router, network),
            rules: rules.to_vec(),
        });
    }
    batch
}

/// Static NAT expressed as firewall-family rules (public ip -> destination ip).
///
/// Every rule needs both addresses.
pub fn create_apply_static_nat_from_firewall_commands(
    rules: &[FirewallRule],
    router: &VirtualRouter,
    network: &Network,
) -> NetplaneResult<CommandBatch> {
    let nats = rules
        .iter()
        .map(|rule| match (&rule.public_ip, &rule.dest_ip) {
            (Some(public_ip), Some(vm_ip)) => Ok(StaticNatRule {
                id: rule.id,
                public_ip: public_ip.clone(),
                vm_ip: vm_ip.clone(),
                revoked: rule.revoked,
            }),
            _ => Err(NetplaneError::validation(
                "rules.dest_ip",
                format!("static nat rule {} needs a public and a destination ip", rule.id),
            )),
        })
        .collect::<NetplaneResult<Vec<_>>>()?;
    Ok(create_apply_static_nat_commands(&nats, router, network))
}

/// One `IpAssoc` per VLAN, ordered by VLAN
pub fn create_associate_ip_commands(
    ips: &[PublicIpAddress],
    router: &VirtualRouter,
    network: &Network,
) -> CommandBatch {
    let mut by_vlan: BTreeMap<Option<u32>, Vec<PublicIpAddress>> = BTreeMap::new();
    for ip in ips {
        by_vlan.entry(ip.vlan).or_default().push(ip.clone());
    }

    let mut batch = CommandBatch::new(OnError::Continue);
    for (vlan, ips) in by_vlan {
        batch.push(Command::IpAssoc {
            router: router_access(router, network),
            vlan,
            ips,
        });
    }
    batch
}

pub fn create_apply_vpn_users_command(
    users: &[VpnUser],
    router: &VirtualRouter,
    network: &Network,
) -> CommandBatch {
    let mut batch = CommandBatch::new(OnError::Continue);
    if !users.is_empty() {
        batch.push(Command::VpnUsersCfg {
            router: router_access(router, network),
            users: users.to_vec(),
        });
    }
    batch
}

pub fn create_password_command(
    router: &VirtualRouter,
    network: &Network,
    vm: &VmProfile,
    nic: &Nic,
) -> Option<Command> {
    let password = vm.password.clone()?;
    Some(Command::SavePassword {
        router: router_access(router, network),
        vm_ip: nic.ipv4.clone(),
        vm_name: vm.host_name.clone(),
        password,
    })
}

/// Metadata files published for a VM by the router
pub fn generate_vm_data(vm: &VmProfile, nic: &Nic, zone: Option<&ZoneMetadata>) -> Vec<VmDataEntry> {
    let mut entries = vec![
        VmDataEntry::new("userdata", "user-data", vm.user_data.clone().unwrap_or_default()),
        VmDataEntry::new("metadata", "service-offering", vm.service_offering.clone()),
        VmDataEntry::new("metadata", "local-ipv4", nic.ipv4.clone()),
        VmDataEntry::new("metadata", "local-hostname", vm.host_name.clone()),
        VmDataEntry::new("metadata", "instance-id", vm.name.clone()),
        VmDataEntry::new("metadata", "vm-id", vm.uuid.clone()),
    ];
    if let Some(public_ip) = &vm.public_ip {
        entries.push(VmDataEntry::new("metadata", "public-ipv4", public_ip.clone()));
        entries.push(VmDataEntry::new("metadata", "public-hostname", public_ip.clone()));
    }
    if let Some(key) = &vm.ssh_public_key {
        entries.push(VmDataEntry::new("metadata", "public-keys", key.clone()));
    }
    if let Some(zone) = zone {
        entries.push(VmDataEntry::new("metadata", "availability-zone", zone.zone_name.clone()));
        entries.push(VmDataEntry::new(
            "metadata",
            "cloud-identifier",
            zone.cloud_identifier.clone(),
        ));
    }
    entries
}

pub fn create_vm_data_command(
    router: &VirtualRouter,
    network: &Network,
    vm: &VmProfile,
    nic: &Nic,
    zone: Option<&ZoneMetadata>,
) -> Command {
    Command::VmData {
        router: router_access(router, network),
        vm_ip: nic.ipv4.clone(),
        vm_name: vm.host_name.clone(),
        entries: generate_vm_data(vm, nic, zone),
    }
}

/// Password first, then user data; the second depends on the first
pub fn create_userdata_and_password_commands(
    router: &VirtualRouter,
    network: &Network,
    vm: &VmProfile,
    nic: &Nic,
    zone: Option<&ZoneMetadata>,
) -> CommandBatch {
    let mut batch = CommandBatch::new(OnError::Stop);
    if let Some(password) = create_password_command(router, network, vm, nic) {
        batch.push(password);
    }
    batch.push(create_vm_data_command(router, network, vm, nic, zone));
    batch
}

pub fn create_ssh_key_commands(
    router: &VirtualRouter,
    network: &Network,
    vm: &VmProfile,
    nic: &Nic,
    ssh_public_key: &str,
) -> CommandBatch {
    let mut batch = CommandBatch::new(OnError::Stop);
    if let Some(password) = create_password_command(router, network, vm, nic) {
        batch.push(password);
    }
    batch.push(Command::VmData {
        router: router_access(router, network),
        vm_ip: nic.ipv4.clone(),
        vm_name: vm.host_name.clone(),
        entries: vec![VmDataEntry::new("metadata", "public-keys", ssh_public_key)],
    });
    batch
}

/// DHCPv6 DUID-LL derived from the NIC MAC (type 3, hardware type 1)
pub fn duid_from_mac(mac: &str) -> String {
    format!("00:03:00:01:{}", mac.to_lowercase())
}

/// Basic zones: IPv4 reservation on the VM's only (default) NIC
pub fn create_dhcp_entry_command(
    router: &VirtualRouter,
    network: &Network,
    vm: &VmProfile,
    nic: &Nic,
) -> Command {
    Command::DhcpEntry {
        router: router_access(router, network),
        entry: DhcpEntry {
            vm_name: vm.host_name.clone(),
            mac: nic.mac.clone(),
            ipv4: Some(nic.ipv4.clone()),
            ipv6: None,
            duid: None,
            gateway: Some(nic.gateway.clone()),
            default_router: true,
            default_dns: true,
            remove: false,
        },
    }
}

/// Advanced zones: non-default NICs get no default route, IPv6 when present
pub fn create_advanced_dhcp_entry_command(
    router: &VirtualRouter,
    network: &Network,
    vm: &VmProfile,
    nic: &Nic,
    remove: bool,
) -> Command {
    Command::DhcpEntry {
        router: router_access(router, network),
        entry: DhcpEntry {
            vm_name: vm.host_name.clone(),
            mac: nic.mac.clone(),
            ipv4: (!nic.ipv4.is_empty()).then(|| nic.ipv4.clone()),
            ipv6: nic.ipv6.clone(),
            duid: nic.ipv6.as_ref().map(|_| duid_from_mac(&nic.mac)),
            gateway: nic.is_default.then(|| nic.gateway.clone()),
            default_router: nic.is_default,
            default_dns: nic.is_default,
            remove,
        },
    }
}
