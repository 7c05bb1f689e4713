use crate::error::NetplaneResult;
use crate::state_machine::{TransitionEvent, TransitionListener, VmState};
use crate::storage::Store;
use crate::types::{AffinityGroup, VmInstance};
use tracing::info;

/// Drops a VM from its affinity groups once it is expunging or in error
pub struct AffinityGroupCleanup {
    store: Store,
}

impl AffinityGroupCleanup {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl TransitionListener<VmInstance> for AffinityGroupCleanup {
    fn name(&self) -> &str {
        "affinity-group-cleanup"
    }

    fn on_transition(&self, event: &TransitionEvent<'_, VmInstance>) -> NetplaneResult<()> {
        if event.from == event.to || !matches!(event.to, VmState::Expunging | VmState::Error) {
            return Ok(());
        }

        let vm_id = event.record.id;
        for group in self.store.list::<AffinityGroup>()? {
            if !group.members.contains(&vm_id) {
                continue;
            }
            let updated = self.store.update_if::<AffinityGroup, _>(group.id.0, |group| {
                let before = group.members.len();
                group.members.retain(|member| *member != vm_id);
                group.members.len() != before
            })?;
            if updated.is_some() {
                info!(vm = %vm_id, group = %group.id, state = ?event.to, "Removed VM from affinity group");
            }
        }
        Ok(())
    }
}
