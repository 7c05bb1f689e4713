use super::topologies::{AdvancedNetworkTopology, BasicNetworkTopology};
use super::NetworkTopology;
use crate::agent::AgentManager;
use crate::error::{NetplaneError, NetplaneResult};
use crate::types::{Network, NetworkType};
use std::collections::HashMap;
use std::sync::Arc;

/// One topology per zone network type
#[derive(Clone)]
pub struct NetworkTopologyContext {
    topologies: HashMap<NetworkType, Arc<dyn NetworkTopology>>,
}

impl NetworkTopologyContext {
    /// Context with the Basic and Advanced topologies sharing `agents`
    pub fn new(agents: AgentManager) -> Self {
        let mut context = Self::empty();
        context.register(Arc::new(BasicNetworkTopology::new(agents.clone())));
        context.register(Arc::new(AdvancedNetworkTopology::new(agents)));
        context
    }

    pub fn empty() -> Self {
        Self {
            topologies: HashMap::new(),
        }
    }

    /// Install `topology`, replacing any previous one for its network type
    pub fn register(&mut self, topology: Arc<dyn NetworkTopology>) {
        self.topologies.insert(topology.network_type(), topology);
    }

    pub fn get(&self, network_type: NetworkType) -> NetplaneResult<Arc<dyn NetworkTopology>> {
        self.topologies.get(&network_type).cloned().ok_or_else(|| {
            NetplaneError::configuration(
                "topology",
                format!("no topology registered for {} zones", network_type),
            )
        })
    }

    pub fn for_network(&self, network: &Network) -> NetplaneResult<Arc<dyn NetworkTopology>> {
        self.get(network.network_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Answer, AgentTransport, Command};
    use crate::config::AgentConfig;
    use crate::rules::{NetworkAclsRules, RuleSet, StaticNatRule};
    use crate::topology::ApplyStatus;
    use crate::types::{HostId, NetworkId, RedundantState, RouterId, VirtualRouter, VmState};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(HostId, String)>>,
    }

    #[async_trait]
    impl AgentTransport for Recorder {
        async fn send(&self, target: HostId, command: &Command) -> NetplaneResult<Answer> {
            self.sent.lock().push((target, command.name().to_string()));
            Ok(Answer::ok())
        }

        fn is_connected(&self, _target: HostId) -> bool {
            true
        }
    }

    fn network(network_type: NetworkType) -> Network {
        Network {
            id: NetworkId(7),
            uuid: "net-uuid".into(),
            name: "guest".into(),
            zone_id: 1,
            zone_name: "z1".into(),
            network_type,
            guest_cidr: "10.1.1.0/24".into(),
            gateway: "10.1.1.1".into(),
            vlan: None,
            domain: "cloud.internal".into(),
            vpc_id: None,
        }
    }

    fn router() -> VirtualRouter {
        VirtualRouter {
            id: RouterId(3),
            name: "r-3-VM".into(),
            host_id: Some(HostId(1)),
            state: VmState::Running,
            is_redundant: false,
            redundant_state: RedundantState::Unknown,
            control_ip: "169.254.3.3".into(),
            guest_ip: "10.1.1.1".into(),
        }
    }

    fn context() -> (NetworkTopologyContext, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let agents = AgentManager::new(recorder.clone(), AgentConfig::default());
        (NetworkTopologyContext::new(agents), recorder)
    }

    #[test]
    fn test_lookup_by_network_type() {
        let (context, _) = context();
        let basic = context.for_network(&network(NetworkType::Basic)).unwrap();
        assert_eq!(basic.network_type(), NetworkType::Basic);
        let advanced = context.get(NetworkType::Advanced).unwrap();
        assert_eq!(advanced.network_type(), NetworkType::Advanced);

        let empty = NetworkTopologyContext::empty();
        assert!(empty.get(NetworkType::Basic).is_err());
    }

    #[tokio::test]
    async fn test_static_nat_reaches_router_host() {
        let (context, recorder) = context();
        let network = network(NetworkType::Basic);
        let topology = context.for_network(&network).unwrap();

        let report = topology
            .apply_static_nats(
                &network,
                &[router()],
                vec![StaticNatRule {
                    id: 1,
                    public_ip: "203.0.113.10".into(),
                    vm_ip: "10.1.1.20".into(),
                    revoked: false,
                }],
            )
            .await
            .unwrap();

        assert_eq!(report.status, ApplyStatus::Applied);
        assert_eq!(
            recorder.sent.lock().clone(),
            vec![(HostId(1), "SetStaticNatRules".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mismatched_topology_rejected() {
        let (context, recorder) = context();
        let network = network(NetworkType::Basic);
        let advanced = context.get(NetworkType::Advanced).unwrap();

        let result = advanced
            .apply_static_nats(&network, &[router()], Vec::new())
            .await;
        assert!(matches!(result, Err(NetplaneError::InvalidOperation { .. })));
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_network_acls_unsupported_without_side_effects() {
        let (context, recorder) = context();
        let network = network(NetworkType::Advanced);
        let topology = context.for_network(&network).unwrap();

        let bundle = RuleSet::NetworkAcls(NetworkAclsRules {
            network: network.clone(),
            items: Vec::new(),
            is_private_gateway: false,
        });
        let result = topology
            .apply_rules(&network, &[router()], "network acls", false, bundle)
            .await;
        assert!(matches!(result, Err(NetplaneError::Unsupported { .. })));
        assert!(recorder.sent.lock().is_empty());
    }
}
