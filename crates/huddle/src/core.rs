//! Core identity and signal types shared by every huddle component.
//!
//! # Signals
//!
//! Everything an external actor does arrives as a [`Signal`]. The kind of a
//! signal is decided once, at the edge, by whoever adapts the platform into
//! huddle:
//!
//! - [`SignalKind::Component`] for presses on interactive controls (buttons,
//!   menus). These carry the control's `custom_id`, which doubles as the
//!   lookup key for correlation tokens.
//! - [`SignalKind::Message`] for free-form text.
//!
//! Engine code matches on the kind instead of probing the shape of the
//! payload.
//!
//! # Acknowledgment
//!
//! Many platforms require every inbound interaction to be acknowledged within
//! a few seconds even when the real decision takes longer. A signal can carry
//! an [`Acknowledge`] hook which the [`SequentialFilter`] fires as soon as the
//! signal arrives.
//!
//! [`SequentialFilter`]: crate::SequentialFilter

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-wide source of correlation token ids.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque, unique identity of a participant, supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create an identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Id of a correlation token.
///
/// Fresh ids are decimal strings drawn from a single process-wide counter, so
/// they never repeat for the lifetime of the process, even across registries.
/// Callers may also supply their own ids (e.g. a stable `custom_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Mint the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TokenId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TokenId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for TokenId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique id of one running session, used for logging and index bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a message previously delivered through a render surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(String);

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Actors
// =============================================================================

/// Someone who can act on a session: a person or an automated participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    pub id: ParticipantId,
    /// Name used when rendering views.
    pub name: String,
    /// Whether moves are computed by the house instead of awaited.
    pub automated: bool,
}

impl Actor {
    /// A person, whose moves arrive as signals.
    pub fn new(id: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            automated: false,
        }
    }

    /// An automated participant, whose moves are computed synchronously.
    pub fn automated(id: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        Self {
            automated: true,
            ..Self::new(id, name)
        }
    }
}

// =============================================================================
// Signals
// =============================================================================

/// Best-effort acknowledgment of an inbound interaction.
///
/// Platform adapters implement this with their "defer update" call. It runs
/// as soon as the signal reaches a filter and must finish within the
/// configured acknowledgment deadline.
#[async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    async fn acknowledge(&self) -> anyhow::Result<()>;
}

/// What an actor did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    /// Pressed an interactive control.
    Component { custom_id: String },
    /// Wrote a message.
    Message { content: String },
}

/// One inbound external event, attributed to an actor.
#[derive(Clone)]
pub struct Signal {
    pub actor: Actor,
    pub kind: SignalKind,
    ack: Option<Arc<dyn Acknowledge>>,
}

impl Signal {
    /// A control press.
    pub fn component(actor: Actor, custom_id: impl Into<String>) -> Self {
        Self {
            actor,
            kind: SignalKind::Component {
                custom_id: custom_id.into(),
            },
            ack: None,
        }
    }

    /// A free-form message.
    pub fn message(actor: Actor, content: impl Into<String>) -> Self {
        Self {
            actor,
            kind: SignalKind::Message {
                content: content.into(),
            },
            ack: None,
        }
    }

    /// Attach the platform's acknowledgment hook.
    pub fn with_ack(mut self, ack: Arc<dyn Acknowledge>) -> Self {
        self.ack = Some(ack);
        self
    }

    /// The pressed control's id, for component signals.
    pub fn custom_id(&self) -> Option<&str> {
        match &self.kind {
            SignalKind::Component { custom_id } => Some(custom_id),
            SignalKind::Message { .. } => None,
        }
    }

    /// The written text, for message signals.
    pub fn content(&self) -> Option<&str> {
        match &self.kind {
            SignalKind::Message { content } => Some(content),
            SignalKind::Component { .. } => None,
        }
    }

    pub(crate) fn acknowledger(&self) -> Option<Arc<dyn Acknowledge>> {
        self.ack.clone()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("actor", &self.actor.id)
            .field("kind", &self.kind)
            .field("acknowledged", &self.ack.is_some())
            .finish()
    }
}
