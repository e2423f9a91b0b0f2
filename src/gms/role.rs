//! Role variants of the membership state machine

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Which role a node currently plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    /// Not a member: initial state, or after leaving
    Client,
    /// A member that is not the coordinator
    Participant,
    /// The member listed first in the current view
    Coordinator,
}

impl RoleKind {
    /// Participant and Coordinator are the member ("server") roles
    pub fn is_member(&self) -> bool {
        !matches!(self, RoleKind::Client)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleKind::Client => "client",
            RoleKind::Participant => "participant",
            RoleKind::Coordinator => "coordinator",
        };
        f.write_str(name)
    }
}

/// Suspicion bookkeeping that only exists while a node is a Participant
#[derive(Debug, Default)]
pub(crate) struct ParticipantState {
    /// Members believed failed but not yet excluded by a view, in insertion order
    pub(crate) suspected: IndexSet<Address>,
}

/// The active role together with its role-specific state.
/// Replacing the variant is the role transition; state never survives it.
#[derive(Debug)]
pub(crate) enum Role {
    Client,
    Participant(ParticipantState),
    Coordinator,
}

impl Role {
    pub(crate) fn participant() -> Self {
        Role::Participant(ParticipantState::default())
    }

    pub(crate) fn kind(&self) -> RoleKind {
        match self {
            Role::Client => RoleKind::Client,
            Role::Participant(_) => RoleKind::Participant,
            Role::Coordinator => RoleKind::Coordinator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Role::Client.kind(), RoleKind::Client);
        assert_eq!(Role::participant().kind(), RoleKind::Participant);
        assert!(RoleKind::Coordinator.is_member());
        assert!(!RoleKind::Client.is_member());
    }

    #[test]
    fn test_fresh_participant_has_no_suspects() {
        match Role::participant() {
            Role::Participant(state) => assert!(state.suspected.is_empty()),
            other => panic!("unexpected role {:?}", other.kind()),
        }
    }
}
