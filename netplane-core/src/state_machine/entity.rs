use super::{StatefulRecord, TransitionToken};
use crate::error::NetplaneResult;
use crate::storage::Store;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// A committed state change, handed to listeners
#[derive(Debug)]
pub struct TransitionEvent<'a, T: StatefulRecord> {
    pub from: T::State,
    pub event: T::Event,
    pub to: T::State,
    pub record: &'a T,
}

/// Observer of committed transitions.
///
/// Listeners run after the conditional update has committed, so a failing
/// listener cannot undo the transition; its error is logged.
pub trait TransitionListener<T: StatefulRecord>: Send + Sync {
    fn name(&self) -> &str;

    fn on_transition(&self, event: &TransitionEvent<'_, T>) -> NetplaneResult<()>;
}

/// Compare-and-swap transition engine for one entity type
pub struct EntityStateMachine<T: StatefulRecord> {
    store: Store,
    listeners: RwLock<Vec<Arc<dyn TransitionListener<T>>>>,
}

impl<T: StatefulRecord> EntityStateMachine<T> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn TransitionListener<T>>) {
        self.listeners.write().push(listener);
    }

    /// Fire `event` on entity `id`, which the caller believes is in `expected`.
    ///
    /// Illegal `(expected, event)` pairs fail with `NoTransition` before the
    /// store is touched. `Ok(false)` means the row is missing, already moved
    /// by someone else, or rejected `token`; the caller should re-fetch.
    pub fn transition(
        &self,
        id: u64,
        event: T::Event,
        expected: T::State,
        token: Option<&TransitionToken>,
    ) -> NetplaneResult<bool> {
        Ok(self.transition_record(id, event, expected, token)?.is_some())
    }

    /// Same as [`EntityStateMachine::transition`] but returns the updated record
    pub fn transition_record(
        &self,
        id: u64,
        event: T::Event,
        expected: T::State,
        token: Option<&TransitionToken>,
    ) -> NetplaneResult<Option<T>> {
        let to = T::state_machine().next_state(expected, event)?;

        let updated = self.store.update_state::<T>(id, expected, event, to, token)?;
        match &updated {
            Some(record) => {
                debug!(
                    kind = T::KIND,
                    id,
                    from = ?expected,
                    event = ?event,
                    to = ?to,
                    "State transition applied"
                );
                self.notify(&TransitionEvent {
                    from: expected,
                    event,
                    to,
                    record,
                });
            }
            None => {
                debug!(
                    kind = T::KIND,
                    id,
                    expected = ?expected,
                    event = ?event,
                    "State transition lost: row missing or state changed"
                );
            }
        }
        Ok(updated)
    }

    fn notify(&self, event: &TransitionEvent<'_, T>) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_transition(event) {
                warn!(
                    listener = listener.name(),
                    kind = T::KIND,
                    id = event.record.key(),
                    error = %e,
                    "Transition listener failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetplaneError;
    use crate::state_machine::{VolumeEvent, VolumeState};
    use crate::types::{DiskOffering, PoolId, Volume, VolumeId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn volume(id: u64, state: VolumeState) -> Volume {
        Volume {
            id: VolumeId(id),
            uuid: crate::types::new_uuid(),
            name: format!("vol-{}", id),
            vm_id: None,
            pool_id: PoolId(1),
            disk_offering: DiskOffering {
                id: 1,
                name: "default".into(),
                use_local_storage: false,
            },
            size_gb: 10,
            state,
            version: 0,
        }
    }

    struct Counter(AtomicUsize);

    impl TransitionListener<Volume> for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn on_transition(&self, _event: &TransitionEvent<'_, Volume>) -> NetplaneResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_transition_and_listener() {
        let store = Store::in_memory().unwrap();
        store.persist(&volume(1, VolumeState::Ready)).unwrap();

        let machine = EntityStateMachine::<Volume>::new(store.clone());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        machine.register_listener(counter.clone());

        assert!(machine
            .transition(1, VolumeEvent::MigrationRequested, VolumeState::Ready, None)
            .unwrap());
        // Stale expectation loses the race
        assert!(!machine
            .transition(1, VolumeEvent::MigrationRequested, VolumeState::Ready, None)
            .unwrap());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        let stored: Volume = store.get(1).unwrap();
        assert_eq!(stored.state, VolumeState::Migrating);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_illegal_pair_does_not_touch_store() {
        let store = Store::in_memory().unwrap();
        let original = volume(1, VolumeState::Allocated);
        store.persist(&original).unwrap();
        let machine = EntityStateMachine::<Volume>::new(store.clone());

        let err = machine
            .transition(1, VolumeEvent::MigrationRequested, VolumeState::Allocated, None)
            .unwrap_err();
        assert!(matches!(err, NetplaneError::NoTransition { .. }));
        assert_eq!(store.get::<Volume>(1).unwrap(), original);
    }

    #[test]
    fn test_missing_row_is_false() {
        let store = Store::in_memory().unwrap();
        let machine = EntityStateMachine::<Volume>::new(store);
        assert!(!machine
            .transition(42, VolumeEvent::CreateRequested, VolumeState::Allocated, None)
            .unwrap());
    }
}
