//! Lifecycle of a single user action:
//! `Idle -> Gating -> (Denied | Submitting) -> (Committed | RolledBack)`.

use std::collections::HashMap;

use crate::api::{ApiError, PostId, Subject};
use crate::gate::{ActionKind, Decision, DenyReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Gating,
    Denied(DenyReason),
    Submitting,
    Committed,
    RolledBack(ApiError),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Denied(_) | Phase::Committed | Phase::RolledBack(_)
        )
    }
}

/// What an in-flight action is about. At most one action per key may be
/// submitting at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Like(Subject),
    Comment(PostId),
    Delete(PostId),
    CreatePost,
}

impl Key {
    pub fn action(&self) -> ActionKind {
        match self {
            Key::Like(_) => ActionKind::Like,
            Key::Comment(_) => ActionKind::Comment,
            Key::Delete(_) => ActionKind::DeletePost,
            Key::CreatePost => ActionKind::CreatePost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    key: Key,
    phase: Phase,
}

impl Interaction {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn begin_gating(&mut self) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Gating;
        } else {
            log::warn!("interaction: {:?} cannot gate from {:?}", self.key, self.phase);
        }
    }

    /// Applies the gate's verdict; a denial ends the interaction.
    pub fn resolve_gate(&mut self, decision: Decision) -> Result<(), DenyReason> {
        if self.phase != Phase::Gating {
            log::warn!("interaction: {:?} resolved outside gating", self.key);
        }
        match decision {
            Decision::Allow => {
                self.phase = Phase::Submitting;
                Ok(())
            }
            Decision::Deny(reason) => {
                self.phase = Phase::Denied(reason.clone());
                Err(reason)
            }
        }
    }

    pub fn finish(&mut self, result: Result<(), ApiError>) {
        if self.phase != Phase::Submitting {
            log::warn!("interaction: {:?} finished from {:?}", self.key, self.phase);
            return;
        }
        self.phase = match result {
            Ok(()) => Phase::Committed,
            Err(err) => Phase::RolledBack(err),
        };
    }
}

/// Actions that passed the gate and are waiting on the network.
#[derive(Debug, Default)]
pub struct InFlight {
    pending: HashMap<Key, Interaction>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs the gate for `key`. A key that is already submitting is denied
    /// without consulting `decide`.
    pub fn admit(
        &mut self,
        key: Key,
        decide: impl FnOnce() -> Decision,
    ) -> Result<(), DenyReason> {
        let mut interaction = Interaction::new(key);
        interaction.begin_gating();
        let mut decision = decide();
        if decision.is_allowed() && self.contains(&key) {
            decision = Decision::Deny(DenyReason::InProgress(key.action()));
        }
        interaction.resolve_gate(decision)?;
        self.pending.insert(key, interaction);
        Ok(())
    }

    /// Settles a submitted action and hands back its final state.
    pub fn complete(&mut self, key: &Key, result: Result<(), ApiError>) -> Option<Interaction> {
        let mut interaction = self.pending.remove(key)?;
        interaction.finish(result);
        Some(interaction)
    }
}
