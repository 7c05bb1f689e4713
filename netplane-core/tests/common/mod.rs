// Common test utilities and helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use netplane_core::agent::{AgentManager, AgentTransport, Answer, Command};
use netplane_core::config::NetplaneConfig;
use netplane_core::error::{NetplaneError, NetplaneResult};
use netplane_core::jobs::AsyncJobManager;
use netplane_core::lock::LockManager;
use netplane_core::rules::{VmProfile, ZoneMetadata};
use netplane_core::state_machine::{VmState, VolumeState};
use netplane_core::types::*;
use netplane_core::vm::VirtualMachineManager;
use netplane_core::Store;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// One command as seen by the scripted transport
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub target: HostId,
    pub command: Command,
}

/// Agent transport double: records every command and answers from a script.
///
/// Commands succeed unless a failure was scripted for their name; hosts can
/// be disconnected and commands delayed.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<SentCommand>>,
    failures: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<String, Duration>>,
    next_delays: Mutex<HashMap<String, Duration>>,
    host_delays: Mutex<HashMap<HostId, Duration>>,
    disconnected: Mutex<HashSet<HostId>>,
    failing_hosts: Mutex<HashSet<HostId>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every command named `command` with `details`
    pub fn fail(&self, command: &str, details: &str) {
        self.failures
            .lock()
            .insert(command.to_string(), details.to_string());
    }

    /// Reject every command sent to `host`
    pub fn fail_host(&self, host: HostId) {
        self.failing_hosts.lock().insert(host);
    }

    pub fn delay(&self, command: &str, delay: Duration) {
        self.delays.lock().insert(command.to_string(), delay);
    }

    /// Delay only the next command named `command`
    pub fn delay_next(&self, command: &str, delay: Duration) {
        self.next_delays.lock().insert(command.to_string(), delay);
    }

    /// Delay every command sent to `host`
    pub fn delay_host(&self, host: HostId, delay: Duration) {
        self.host_delays.lock().insert(host, delay);
    }

    pub fn disconnect(&self, host: HostId) {
        self.disconnected.lock().insert(host);
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn sent_names(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|sent| sent.command.name().to_string())
            .collect()
    }

    pub fn sent_to(&self, host: HostId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|sent| sent.target == host)
            .map(|sent| sent.command.name().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn send(&self, target: HostId, command: &Command) -> NetplaneResult<Answer> {
        self.sent.lock().push(SentCommand {
            target,
            command: command.clone(),
        });

        let delay = self
            .next_delays
            .lock()
            .remove(command.name())
            .or_else(|| self.delays.lock().get(command.name()).copied())
            .or_else(|| self.host_delays.lock().get(&target).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_hosts.lock().contains(&target) {
            return Ok(Answer::failed(format!("{} rejected by {}", command.name(), target)));
        }
        let failure = self.failures.lock().get(command.name()).cloned();
        Ok(match failure {
            Some(details) => Answer::failed(details),
            None => Answer::ok(),
        })
    }

    fn is_connected(&self, target: HostId) -> bool {
        !self.disconnected.lock().contains(&target)
    }
}

pub fn test_config() -> NetplaneConfig {
    NetplaneConfig::test()
}

pub fn agents(transport: &Arc<ScriptedTransport>, config: &NetplaneConfig) -> AgentManager {
    AgentManager::new(transport.clone(), config.agent.clone())
}

pub fn network(id: u64, network_type: NetworkType) -> Network {
    Network {
        id: NetworkId(id),
        uuid: new_uuid(),
        name: format!("guest-{}", id),
        zone_id: 1,
        zone_name: "zone-1".into(),
        network_type,
        guest_cidr: "10.1.1.0/24".into(),
        gateway: "10.1.1.1".into(),
        vlan: Some(100),
        domain: "cloud.internal".into(),
        vpc_id: None,
    }
}

pub fn router(id: u64, host: u64, state: VmState) -> VirtualRouter {
    VirtualRouter {
        id: RouterId(id),
        name: format!("r-{}-VM", id),
        host_id: Some(HostId(host)),
        state,
        is_redundant: false,
        redundant_state: RedundantState::Unknown,
        control_ip: format!("169.254.0.{}", id),
        guest_ip: "10.1.1.1".into(),
    }
}

pub fn redundant_pair(first: u64, second: u64) -> Vec<VirtualRouter> {
    let mut primary = router(first, first, VmState::Running);
    primary.is_redundant = true;
    primary.redundant_state = RedundantState::Primary;
    let mut backup = router(second, second, VmState::Running);
    backup.is_redundant = true;
    backup.redundant_state = RedundantState::Backup;
    vec![primary, backup]
}

pub fn nic(network_id: u64, is_default: bool) -> Nic {
    Nic {
        id: 11,
        network_id: NetworkId(network_id),
        mac: "02:00:4C:AA:00:0B".into(),
        ipv4: "10.1.1.20".into(),
        ipv6: None,
        netmask: "255.255.255.0".into(),
        gateway: "10.1.1.1".into(),
        is_default,
    }
}

pub fn vm_profile() -> VmProfile {
    VmProfile {
        id: VmId(1),
        uuid: new_uuid(),
        name: "i-2-1-VM".into(),
        host_name: "web-1".into(),
        service_offering: "small".into(),
        password: Some("s3cret".into()),
        user_data: Some("I2Nsb3VkLWNvbmZpZw==".into()),
        ssh_public_key: Some("ssh-ed25519 AAAAC3Nza test@example".into()),
        public_ip: Some("203.0.113.20".into()),
    }
}

pub fn zone() -> ZoneMetadata {
    ZoneMetadata {
        zone_name: "zone-1".into(),
        cloud_identifier: "CloudStack-{test}".into(),
        dns: vec!["10.0.0.53".into()],
    }
}

pub fn offering(cpu: u32, memory_mb: u32, dynamic_scaling: bool) -> ServiceOffering {
    ServiceOffering {
        id: cpu as u64 * 1000 + memory_mb as u64,
        name: format!("{}c-{}m", cpu, memory_mb),
        cpu,
        speed_mhz: 2000,
        memory_mb,
        dynamic_scaling,
    }
}

pub fn disk_offering(use_local_storage: bool) -> DiskOffering {
    DiskOffering {
        id: if use_local_storage { 2 } else { 1 },
        name: if use_local_storage { "local" } else { "shared" }.into(),
        use_local_storage,
    }
}

pub const HOST_1: HostId = HostId(1);
pub const HOST_2: HostId = HostId(2);
/// Cluster-wide shared pools
pub const SHARED_POOL_1: PoolId = PoolId(1);
pub const SHARED_POOL_2: PoolId = PoolId(2);
/// Local disks of host 1 and host 2
pub const LOCAL_POOL_1: PoolId = PoolId(3);
pub const LOCAL_POOL_2: PoolId = PoolId(4);

/// Wired VM manager on an in-memory store with two hosts in one cluster
pub struct VmHarness {
    pub config: NetplaneConfig,
    pub store: Store,
    pub transport: Arc<ScriptedTransport>,
    pub locks: Arc<LockManager>,
    pub jobs: Arc<AsyncJobManager>,
    pub manager: Arc<VirtualMachineManager>,
}

impl VmHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: NetplaneConfig) -> Self {
        let store = Store::in_memory().unwrap();
        let transport = ScriptedTransport::new();
        let locks = Arc::new(LockManager::new(
            config.node_id,
            store.clone(),
            config.lock.clone(),
        ));
        let jobs = AsyncJobManager::new(config.node_id, store.clone(), config.jobs.clone());
        let manager = VirtualMachineManager::new(
            &config,
            store.clone(),
            locks.clone(),
            jobs.clone(),
            agents(&transport, &config),
        );

        let harness = Self {
            config,
            store,
            transport,
            locks,
            jobs,
            manager,
        };
        harness.seed_infrastructure();
        harness
    }

    fn seed_infrastructure(&self) {
        for id in [HOST_1, HOST_2] {
            self.store
                .persist(&Host {
                    id,
                    name: format!("kvm-{}", id.value()),
                    cluster_id: 1,
                    private_ip: format!("10.0.0.{}", id.value()),
                })
                .unwrap();
        }
        let pools = [
            (SHARED_POOL_1, PoolScope::Cluster(1)),
            (SHARED_POOL_2, PoolScope::Cluster(1)),
            (LOCAL_POOL_1, PoolScope::Host(HOST_1)),
            (LOCAL_POOL_2, PoolScope::Host(HOST_2)),
        ];
        for (id, scope) in pools {
            self.store
                .persist(&StoragePool {
                    id,
                    name: format!("pool-{}", id.value()),
                    scope,
                })
                .unwrap();
        }
    }

    /// Running VM on host 1 with one root volume on `pool`
    pub fn running_vm(&self, id: u64, pool: PoolId, local_disk: bool) -> (VmInstance, Volume) {
        let mut vm = VmInstance::new(VmId(id), format!("i-2-{}-VM", id), offering(2, 2048, true));
        vm.state = VmState::Running;
        vm.host_id = Some(HOST_1);
        self.store.persist(&vm).unwrap();

        let volume = Volume {
            id: VolumeId(id * 10),
            uuid: new_uuid(),
            name: format!("ROOT-{}", id),
            vm_id: Some(vm.id),
            pool_id: pool,
            disk_offering: disk_offering(local_disk),
            size_gb: 20,
            state: VolumeState::Ready,
            version: 0,
        };
        self.store.persist(&volume).unwrap();
        (vm, volume)
    }

    pub fn vm(&self, id: VmId) -> VmInstance {
        self.store.get(id.value()).unwrap()
    }

    pub fn volume(&self, id: VolumeId) -> Volume {
        self.store.get(id.value()).unwrap()
    }
}

/// Wait for a condition with timeout
pub async fn wait_for_condition<F>(mut condition: F, timeout: Duration) -> NetplaneResult<()>
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(NetplaneError::Timeout {
        operation: "wait_for_condition".to_string(),
        duration: timeout,
    })
}
