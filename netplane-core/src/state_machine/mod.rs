//! Entity state machines
//!
//! Every long-lived entity (VM, volume, static route, ACL item) moves along the
//! edges of a static transition table. Tables are plain data checked before
//! any store access; the store then applies the move with a conditional update
//! so that concurrent writers cannot both win.

mod entity;
mod tables;

pub use entity::{EntityStateMachine, TransitionEvent, TransitionListener};
pub use tables::{
    NetworkAclItemEvent, NetworkAclItemState, StaticRouteEvent, StaticRouteState, VmEvent,
    VmState, VolumeEvent, VolumeState,
};

use crate::error::{NetplaneError, NetplaneResult};
use crate::storage::Record;
use crate::types::HostId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Marker for state enums
pub trait EntityState: Copy + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> EntityState for T {}

/// Marker for event enums
pub trait EntityEvent: Copy + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> EntityEvent for T {}

/// Opaque identity of an in-flight host move, used to make completion idempotent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionToken {
    pub src_host: HostId,
    pub dest_host: HostId,
}

impl TransitionToken {
    pub fn new(src_host: HostId, dest_host: HostId) -> Self {
        Self {
            src_host,
            dest_host,
        }
    }
}

/// Static `(from, event) -> to` table for one entity type
#[derive(Debug)]
pub struct StateMachine<S, E> {
    entity: &'static str,
    transitions: HashMap<(S, E), S>,
}

impl<S: EntityState, E: EntityEvent> StateMachine<S, E> {
    pub fn new(entity: &'static str, edges: &[(S, E, S)]) -> Self {
        let transitions = edges
            .iter()
            .map(|(from, event, to)| ((*from, *event), *to))
            .collect();
        Self {
            entity,
            transitions,
        }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Target state for `event` fired in `from`, or `NoTransition`
    pub fn next_state(&self, from: S, event: E) -> NetplaneResult<S> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| NetplaneError::NoTransition {
                entity: self.entity.to_string(),
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    pub fn is_legal(&self, from: S, event: E) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// Events that are legal in `from`
    pub fn events_from(&self, from: S) -> Vec<E> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == from)
            .map(|(_, event)| *event)
            .collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = (S, E, S)> + '_ {
        self.transitions
            .iter()
            .map(|((from, event), to)| (*from, *event, *to))
    }
}

/// A record that carries a state governed by a [`StateMachine`]
pub trait StatefulRecord: Record + Clone {
    type State: EntityState;
    type Event: EntityEvent;

    fn state_machine() -> &'static StateMachine<Self::State, Self::Event>;

    fn state(&self) -> Self::State;

    fn set_state(&mut self, state: Self::State);

    /// Optimistic concurrency counter, bumped by every transition
    fn bump_version(&mut self);

    /// Whether a transition carrying `token` may be applied to this row
    fn accepts_token(&self, _token: Option<&TransitionToken>) -> bool {
        true
    }

    /// Field updates that accompany a transition; runs in the update transaction
    fn on_transition(
        &mut self,
        _from: Self::State,
        _event: Self::Event,
        _to: Self::State,
        _token: Option<&TransitionToken>,
    ) {
    }
}
