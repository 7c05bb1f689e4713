use super::{StateMachine, StatefulRecord, TransitionToken};
use crate::types::{NetworkAclItem, StaticRoute, VmInstance, Volume};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Migrating,
    Error,
    Destroyed,
    Expunging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmEvent {
    StartRequested,
    OperationSucceeded,
    OperationFailed,
    OperationFailedToError,
    OperationRetry,
    StopRequested,
    MigrationRequested,
    AgentReportStopped,
    AgentReportRunning,
    DestroyRequested,
    RecoveryRequested,
    ExpungeOperation,
}

static VM_MACHINE: Lazy<StateMachine<VmState, VmEvent>> = Lazy::new(|| {
    use VmEvent::*;
    use VmState::*;
    StateMachine::new(
        "vm",
        &[
            (Stopped, StartRequested, Starting),
            (Stopped, StopRequested, Stopped),
            (Stopped, AgentReportStopped, Stopped),
            (Stopped, DestroyRequested, Destroyed),
            (Stopped, OperationFailed, Error),
            (Stopped, ExpungeOperation, Expunging),
            (Starting, OperationRetry, Starting),
            (Starting, OperationSucceeded, Running),
            (Starting, OperationFailed, Stopped),
            (Starting, OperationFailedToError, Error),
            (Starting, AgentReportRunning, Running),
            (Starting, AgentReportStopped, Stopped),
            (Running, MigrationRequested, Migrating),
            (Running, OperationSucceeded, Running),
            (Running, StopRequested, Stopping),
            (Running, AgentReportRunning, Running),
            (Running, AgentReportStopped, Stopped),
            (Migrating, MigrationRequested, Migrating),
            (Migrating, OperationSucceeded, Running),
            (Migrating, OperationFailed, Running),
            (Migrating, AgentReportRunning, Running),
            (Migrating, AgentReportStopped, Stopped),
            (Stopping, OperationSucceeded, Stopped),
            (Stopping, OperationFailed, Running),
            (Stopping, StopRequested, Stopping),
            (Stopping, AgentReportRunning, Running),
            (Stopping, AgentReportStopped, Stopped),
            (Destroyed, RecoveryRequested, Stopped),
            (Destroyed, ExpungeOperation, Expunging),
            (Error, DestroyRequested, Expunging),
            (Error, ExpungeOperation, Expunging),
            (Expunging, OperationFailed, Expunging),
            (Expunging, ExpungeOperation, Expunging),
        ],
    )
});

impl StatefulRecord for VmInstance {
    type State = VmState;
    type Event = VmEvent;

    fn state_machine() -> &'static StateMachine<VmState, VmEvent> {
        &VM_MACHINE
    }

    fn state(&self) -> VmState {
        self.state
    }

    fn set_state(&mut self, state: VmState) {
        self.state = state;
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }

    fn accepts_token(&self, token: Option<&TransitionToken>) -> bool {
        // A migration can only be completed by the move that started it
        match (self.state, token) {
            (VmState::Migrating, Some(token)) => self.pending_migration.as_ref() == Some(token),
            _ => true,
        }
    }

    fn on_transition(
        &mut self,
        from: VmState,
        event: VmEvent,
        to: VmState,
        token: Option<&TransitionToken>,
    ) {
        match (from, event, to) {
            (_, VmEvent::MigrationRequested, VmState::Migrating) => {
                if let Some(token) = token {
                    self.pending_migration = Some(*token);
                }
            }
            (VmState::Migrating, VmEvent::OperationSucceeded, VmState::Running) => {
                if let Some(pending) = self.pending_migration.take() {
                    self.last_host_id = Some(pending.src_host);
                    self.host_id = Some(pending.dest_host);
                }
            }
            (VmState::Migrating, _, _) => {
                self.pending_migration = None;
            }
            (_, VmEvent::StartRequested, VmState::Starting) => {
                if let Some(token) = token {
                    self.host_id = Some(token.dest_host);
                }
            }
            _ => {}
        }

        if to == VmState::Stopped && from != VmState::Stopped {
            if self.host_id.is_some() {
                self.last_host_id = self.host_id;
            }
            self.host_id = None;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeState {
    Allocated,
    Creating,
    Ready,
    Migrating,
    Destroy,
    Expunging,
    Expunged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeEvent {
    CreateRequested,
    OperationSucceeded,
    OperationFailed,
    OperationRetry,
    MigrationRequested,
    DestroyRequested,
    ExpungingRequested,
    RecoveryRequested,
}

static VOLUME_MACHINE: Lazy<StateMachine<VolumeState, VolumeEvent>> = Lazy::new(|| {
    use VolumeEvent::*;
    use VolumeState::*;
    StateMachine::new(
        "volume",
        &[
            (Allocated, CreateRequested, Creating),
            (Allocated, DestroyRequested, Destroy),
            (Creating, OperationRetry, Creating),
            (Creating, OperationSucceeded, Ready),
            (Creating, OperationFailed, Allocated),
            (Ready, MigrationRequested, Migrating),
            (Ready, DestroyRequested, Destroy),
            (Migrating, OperationSucceeded, Ready),
            (Migrating, OperationFailed, Ready),
            (Destroy, RecoveryRequested, Ready),
            (Destroy, ExpungingRequested, Expunging),
            (Expunging, OperationSucceeded, Expunged),
            (Expunging, OperationFailed, Destroy),
        ],
    )
});

impl StatefulRecord for Volume {
    type State = VolumeState;
    type Event = VolumeEvent;

    fn state_machine() -> &'static StateMachine<VolumeState, VolumeEvent> {
        &VOLUME_MACHINE
    }

    fn state(&self) -> VolumeState {
        self.state
    }

    fn set_state(&mut self, state: VolumeState) {
        self.state = state;
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaticRouteState {
    Staged,
    Add,
    Active,
    Update,
    Revoke,
    Deleting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaticRouteEvent {
    AddRequested,
    UpdateRequested,
    RevokeRequested,
    OperationSucceeded,
    OperationFailed,
}

static STATIC_ROUTE_MACHINE: Lazy<StateMachine<StaticRouteState, StaticRouteEvent>> =
    Lazy::new(|| {
        use StaticRouteEvent::*;
        use StaticRouteState::*;
        StateMachine::new(
            "static route",
            &[
                (Staged, AddRequested, Add),
                (Staged, RevokeRequested, Revoke),
                (Add, OperationSucceeded, Active),
                (Add, OperationFailed, Staged),
                (Add, RevokeRequested, Revoke),
                (Active, UpdateRequested, Update),
                (Active, RevokeRequested, Revoke),
                (Update, OperationSucceeded, Active),
                (Update, OperationFailed, Active),
                (Revoke, OperationSucceeded, Deleting),
                (Revoke, OperationFailed, Revoke),
            ],
        )
    });

impl StatefulRecord for StaticRoute {
    type State = StaticRouteState;
    type Event = StaticRouteEvent;

    fn state_machine() -> &'static StateMachine<StaticRouteState, StaticRouteEvent> {
        &STATIC_ROUTE_MACHINE
    }

    fn state(&self) -> StaticRouteState {
        self.state
    }

    fn set_state(&mut self, state: StaticRouteState) {
        self.state = state;
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkAclItemState {
    Add,
    Active,
    Revoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkAclItemEvent {
    OperationSucceeded,
    UpdateRequested,
    RevokeRequested,
}

static ACL_ITEM_MACHINE: Lazy<StateMachine<NetworkAclItemState, NetworkAclItemEvent>> =
    Lazy::new(|| {
        use NetworkAclItemEvent::*;
        use NetworkAclItemState::*;
        StateMachine::new(
            "network acl item",
            &[
                (Add, OperationSucceeded, Active),
                (Add, RevokeRequested, Revoke),
                (Active, UpdateRequested, Add),
                (Active, RevokeRequested, Revoke),
            ],
        )
    });

impl StatefulRecord for NetworkAclItem {
    type State = NetworkAclItemState;
    type Event = NetworkAclItemEvent;

    fn state_machine() -> &'static StateMachine<NetworkAclItemState, NetworkAclItemEvent> {
        &ACL_ITEM_MACHINE
    }

    fn state(&self) -> NetworkAclItemState {
        self.state
    }

    fn set_state(&mut self, state: NetworkAclItemState) {
        self.state = state;
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_table_lookups() {
        let machine = VmInstance::state_machine();
        assert_eq!(
            machine.next_state(VmState::Running, VmEvent::MigrationRequested).unwrap(),
            VmState::Migrating
        );
        assert_eq!(
            machine.next_state(VmState::Migrating, VmEvent::OperationFailed).unwrap(),
            VmState::Running
        );
        assert!(machine
            .next_state(VmState::Stopped, VmEvent::MigrationRequested)
            .is_err());
    }

    #[test]
    fn test_migration_token_moves_host() {
        let offering = crate::types::ServiceOffering {
            id: 1,
            name: "s".into(),
            cpu: 1,
            speed_mhz: 500,
            memory_mb: 256,
            dynamic_scaling: false,
        };
        let mut vm = VmInstance::new(crate::types::VmId(1), "v1", offering);
        vm.state = VmState::Running;
        vm.host_id = Some(crate::types::HostId(1));

        let token = TransitionToken::new(crate::types::HostId(1), crate::types::HostId(2));
        vm.on_transition(
            VmState::Running,
            VmEvent::MigrationRequested,
            VmState::Migrating,
            Some(&token),
        );
        vm.set_state(VmState::Migrating);

        let other = TransitionToken::new(crate::types::HostId(1), crate::types::HostId(3));
        assert!(vm.accepts_token(Some(&token)));
        assert!(!vm.accepts_token(Some(&other)));

        vm.on_transition(
            VmState::Migrating,
            VmEvent::OperationSucceeded,
            VmState::Running,
            Some(&token),
        );
        assert_eq!(vm.host_id, Some(crate::types::HostId(2)));
        assert_eq!(vm.last_host_id, Some(crate::types::HostId(1)));
        assert!(vm.pending_migration.is_none());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        assert!(Volume::state_machine()
            .events_from(VolumeState::Expunged)
            .is_empty());
        assert!(NetworkAclItem::state_machine()
            .events_from(NetworkAclItemState::Revoke)
            .is_empty());
        assert!(StaticRoute::state_machine()
            .events_from(StaticRouteState::Deleting)
            .is_empty());
    }
}
