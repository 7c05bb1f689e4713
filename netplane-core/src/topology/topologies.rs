use super::visitor::{AdvancedNetworkVisitor, BasicNetworkVisitor, NetworkTopologyVisitor};
use super::NetworkTopology;
use crate::agent::AgentManager;
use crate::types::NetworkType;

/// Topology of Basic zones
pub struct BasicNetworkTopology {
    visitor: BasicNetworkVisitor,
    agents: AgentManager,
}

impl BasicNetworkTopology {
    pub fn new(agents: AgentManager) -> Self {
        Self {
            visitor: BasicNetworkVisitor,
            agents,
        }
    }
}

impl NetworkTopology for BasicNetworkTopology {
    fn network_type(&self) -> NetworkType {
        NetworkType::Basic
    }

    fn visitor(&self) -> &dyn NetworkTopologyVisitor {
        &self.visitor
    }

    fn agents(&self) -> &AgentManager {
        &self.agents
    }
}

/// Topology of Advanced zones
pub struct AdvancedNetworkTopology {
    visitor: AdvancedNetworkVisitor,
    agents: AgentManager,
}

impl AdvancedNetworkTopology {
    pub fn new(agents: AgentManager) -> Self {
        Self {
            visitor: AdvancedNetworkVisitor::default(),
            agents,
        }
    }
}

impl NetworkTopology for AdvancedNetworkTopology {
    fn network_type(&self) -> NetworkType {
        NetworkType::Advanced
    }

    fn visitor(&self) -> &dyn NetworkTopologyVisitor {
        &self.visitor
    }

    fn agents(&self) -> &AgentManager {
        &self.agents
    }
}
