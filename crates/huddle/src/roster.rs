//! Ordered participants with a turn cursor.
//!
//! Join order is turn order. The cursor always points at a valid index (0
//! when empty), and [`Roster::next`] wraps around.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::core::{Actor, ParticipantId};

/// Roster shared between a session and the filters that mutate it.
pub type SharedRoster<D> = Arc<Mutex<Roster<D>>>;

pub(crate) fn lock<D>(roster: &SharedRoster<D>) -> MutexGuard<'_, Roster<D>> {
    roster.lock().unwrap_or_else(|poisoned| {
        warn!("roster lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// One seat in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant<D> {
    pub id: ParticipantId,
    pub name: String,
    pub automated: bool,
    /// Per-round state owned by the game, if any has been assigned.
    pub data: Option<D>,
}

impl<D> Participant<D> {
    pub fn new(actor: &Actor) -> Self {
        Self {
            id: actor.id.clone(),
            name: actor.name.clone(),
            automated: actor.automated,
            data: None,
        }
    }

    pub fn with_data(mut self, data: D) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Roster<D> {
    participants: Vec<Participant<D>>,
    cursor: usize,
}

impl<D> Default for Roster<D> {
    fn default() -> Self {
        Self {
            participants: Vec::new(),
            cursor: 0,
        }
    }
}

impl<D> Roster<D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &ParticipantId) -> Option<usize> {
        self.participants.iter().position(|p| &p.id == id)
    }

    /// Insert at the end if absent. Returns whether it was inserted.
    pub fn add(&mut self, participant: Participant<D>) -> bool {
        if self.contains(&participant.id) {
            return false;
        }
        self.participants.push(participant);
        true
    }

    /// Insert, or replace in place if already present.
    pub fn set(&mut self, participant: Participant<D>) {
        match self.position(&participant.id) {
            Some(index) => self.participants[index] = participant,
            None => self.participants.push(participant),
        }
    }

    /// Mutate a participant if present. Returns whether it was found.
    pub fn update(&mut self, id: &ParticipantId, f: impl FnOnce(&mut Participant<D>)) -> bool {
        match self.get_mut(id) {
            Some(participant) => {
                f(participant);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant<D>> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant<D>> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.position(id).is_some()
    }

    /// Remove by identity. The participant under the cursor stays under it
    /// when someone earlier leaves.
    pub fn delete(&mut self, id: &ParticipantId) -> Option<Participant<D>> {
        let index = self.position(id)?;
        let removed = self.participants.remove(index);

        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.participants.len() {
            self.cursor = 0;
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.cursor = 0;
    }

    /// Assign fresh turn data to everyone. `factory` runs once per
    /// participant, in join order.
    pub fn reset(&mut self, mut factory: impl FnMut() -> D) {
        for participant in &mut self.participants {
            participant.data = Some(factory());
        }
    }

    pub fn clear_turn_data(&mut self) {
        for participant in &mut self.participants {
            participant.data = None;
        }
    }

    /// Whether every participant has turn data.
    pub fn ready(&self) -> bool {
        self.participants.iter().all(|p| p.data.is_some())
    }

    /// Participant whose turn it is.
    pub fn current(&self) -> Option<&Participant<D>> {
        self.participants.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut Participant<D>> {
        self.participants.get_mut(self.cursor)
    }

    /// Participant after the current one, wrapping around.
    pub fn other(&self) -> Option<&Participant<D>> {
        if self.participants.is_empty() {
            return None;
        }
        self.participants
            .get((self.cursor + 1) % self.participants.len())
    }

    /// Advance the cursor, wrapping around.
    pub fn next(&mut self) -> Option<&Participant<D>> {
        if self.participants.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.participants.len();
        self.current()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant<D>> {
        self.participants.iter()
    }

    pub fn has_automated(&self) -> bool {
        self.participants.iter().any(|p| p.automated)
    }
}
