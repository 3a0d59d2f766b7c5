//! Process-wide index of live sessions, keyed by initiator.
//!
//! An initiator owns at most one live session. Registration hands back a
//! [`LiveGuard`]; dropping it removes the entry no matter how the session
//! ended.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::core::{MessageRef, ParticipantId, SessionId};
use crate::error::SessionError;

#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session: SessionId,
    /// The session's message, once it has delivered one.
    pub message: Option<MessageRef>,
}

/// Shared map of initiators to their live session.
#[derive(Debug, Clone, Default)]
pub struct SessionIndex {
    live: Arc<DashMap<ParticipantId, LiveSession>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `initiator`'s slot for `session`.
    ///
    /// Fails with [`SessionError::Conflict`] if the initiator already owns a
    /// live session.
    pub fn register(
        &self,
        initiator: &ParticipantId,
        session: SessionId,
    ) -> Result<LiveGuard, SessionError> {
        match self.live.entry(initiator.clone()) {
            Entry::Occupied(existing) => Err(SessionError::Conflict {
                initiator: initiator.clone(),
                existing: existing.get().message.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(LiveSession {
                    session,
                    message: None,
                });
                debug!(initiator = %initiator, session = %session, "session registered");
                Ok(LiveGuard {
                    live: self.live.clone(),
                    initiator: initiator.clone(),
                    session,
                })
            }
        }
    }

    /// Remember the message a live session delivered.
    pub fn attach(&self, initiator: &ParticipantId, session: SessionId, message: MessageRef) {
        if let Some(mut entry) = self.live.get_mut(initiator) {
            if entry.session == session {
                entry.message = Some(message);
            }
        }
    }

    pub fn get(&self, initiator: &ParticipantId) -> Option<LiveSession> {
        self.live.get(initiator).map(|entry| entry.clone())
    }

    pub fn contains(&self, initiator: &ParticipantId) -> bool {
        self.live.contains_key(initiator)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Removes its index entry on drop.
#[derive(Debug)]
pub struct LiveGuard {
    live: Arc<DashMap<ParticipantId, LiveSession>>,
    initiator: ParticipantId,
    session: SessionId,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        // Only remove our own entry.
        let session = self.session;
        self.live
            .remove_if(&self.initiator, |_, live| live.session == session);
        debug!(initiator = %self.initiator, session = %session, "session deregistered");
    }
}
