//! Structured error types for huddle.
//!
//! Each concern gets a pattern-matchable enum instead of a generic
//! `anyhow::Error`:
//!
//! - [`ChannelError`] for [`ProcessChannel`](crate::ProcessChannel) calls
//! - [`ThrottleError`] for [`Throttle`](crate::Throttle) results
//! - [`RegistryError`] for [`CorrelationRegistry`](crate::CorrelationRegistry)
//! - [`SessionError`] for everything that unwinds a session
//!
//! `anyhow` stays the transport for collaborator failures (render surfaces,
//! remote operations); those are wrapped in [`SessionError::Internal`].
//!
//! # The Reporting Rule
//!
//! > **Only sanitized messages reach users.**
//!
//! [`SessionError::category`] classifies every error, and
//! [`SessionError::safe_message`] returns text that is safe to show:
//! user errors and conflicts expose their message, everything else is
//! replaced by a generic notice. Control signals are never reported at all.
//!
//! ```ignore
//! match host.start(game, initiator, surface.clone()).await {
//!     Ok(outcome) => tracing::info!(?outcome, "session ended"),
//!     Err(e) => host.report(surface.as_ref(), &e).await,
//! }
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::{MessageRef, ParticipantId, TokenId};
use crate::envelope::RemoteError;
use crate::registry::Expired;

/// Generic notice shown for failures whose details must stay internal.
pub const GENERIC_FAILURE: &str = "An error occurred while processing the interaction.";

// =============================================================================
// Error Category
// =============================================================================

/// Classification used to decide how an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Recoverable, user-facing. Safe to expose.
    User,
    /// The initiator already owns a live session. Safe to expose.
    Conflict,
    /// A registry entry or collector expired. Generic message only.
    Timeout,
    /// Failure reconstructed from the other side of a process channel.
    Remote,
    /// Non-error unwinding. Never reported.
    Control,
    /// Anything unrecognized. Logged, generic message only.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "user_error"),
            ErrorCategory::Conflict => write!(f, "session_conflict"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Remote => write!(f, "remote_failure"),
            ErrorCategory::Control => write!(f, "control"),
            ErrorCategory::Internal => write!(f, "internal_error"),
        }
    }
}

// =============================================================================
// Registry Error
// =============================================================================

/// Errors raised by the correlation registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A caller-supplied id is already bound to a live entry.
    #[error("token {0} is already live")]
    DuplicateToken(TokenId),
}

// =============================================================================
// Channel Error
// =============================================================================

/// Errors raised while calling across a [`ProcessChannel`](crate::ProcessChannel).
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No reply arrived before the token expired.
    #[error("no reply within {duration:?}")]
    Timeout {
        /// How long we waited.
        duration: Duration,
    },

    /// The remote operation failed; the original error is preserved.
    #[error("remote failure: {0}")]
    Remote(RemoteError),

    /// A frame could not be encoded or decoded.
    #[error("malformed envelope: {0}")]
    Codec(#[from] serde_json::Error),

    /// The transport refused the frame.
    #[error("transport failed: {message}")]
    Transport {
        /// The underlying error message.
        message: String,
    },

    /// The channel was dropped while a call was pending.
    #[error("channel closed before a reply arrived")]
    Closed,
}

impl From<Expired> for ChannelError {
    fn from(expired: Expired) -> Self {
        ChannelError::Timeout {
            duration: expired.ttl,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Transport {
            message: e.to_string(),
        }
    }
}

// =============================================================================
// Throttle Error
// =============================================================================

/// Errors delivered through a throttle's shared result.
///
/// Cloneable because every caller that joined a scheduled execution receives
/// the same outcome.
#[derive(Debug, Clone, Error)]
pub enum ThrottleError {
    /// The throttled call itself failed.
    #[error("throttled call failed: {0}")]
    Failed(Arc<anyhow::Error>),

    /// The pending call was cleared before it ran.
    #[error("throttled call was cancelled")]
    Cancelled,

    /// The throttle was dropped before the scheduled call ran.
    #[error("throttle dropped before the scheduled call ran")]
    Dropped,
}

// =============================================================================
// Session Error
// =============================================================================

/// Everything that can unwind a session.
///
/// [`SessionError::Complete`] and [`SessionError::Aborted`] are control
/// signals, not failures: they are how a game ends its own loop, and
/// [`Session::run`](crate::Session::run) turns them into a
/// [`SessionOutcome`](crate::SessionOutcome).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Recoverable, user-facing problem (invalid input, bad options).
    #[error("{0}")]
    User(String),

    /// The initiator already owns a live session.
    #[error("{initiator} already owns a live session")]
    Conflict {
        initiator: ParticipantId,
        /// The running session's message, when it has one.
        existing: Option<MessageRef>,
    },

    /// A registry entry or collector expired without resolution.
    #[error("timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Failure reconstructed from the other side of a process channel.
    #[error("remote failure: {0}")]
    Remote(RemoteError),

    /// The session finished normally.
    #[error("session complete")]
    Complete,

    /// The session was deliberately aborted; the reason was already shown.
    #[error("session aborted: {reason}")]
    Aborted { reason: String },

    /// Unrecognized failure from a collaborator.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    /// Shorthand for a user-facing error.
    pub fn user(message: impl Into<String>) -> Self {
        SessionError::User(message.into())
    }

    /// Whether this is a control signal rather than a failure.
    pub fn is_control(&self) -> bool {
        self.category() == ErrorCategory::Control
    }

    /// Classify the error for reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::User(_) => ErrorCategory::User,
            SessionError::Conflict { .. } => ErrorCategory::Conflict,
            SessionError::Timeout { .. } => ErrorCategory::Timeout,
            SessionError::Remote(_) => ErrorCategory::Remote,
            SessionError::Complete | SessionError::Aborted { .. } => ErrorCategory::Control,
            SessionError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// A message that is safe to show to the user.
    pub fn safe_message(&self) -> Cow<'static, str> {
        match self {
            SessionError::User(message) => message.clone().into(),
            SessionError::Conflict { .. } => {
                "You can not start more than one session at a time.".into()
            }
            SessionError::Timeout { .. } => "The interaction timed out.".into(),
            _ => GENERIC_FAILURE.into(),
        }
    }
}

impl From<Expired> for SessionError {
    fn from(expired: Expired) -> Self {
        SessionError::Timeout {
            duration: expired.ttl,
        }
    }
}

impl From<ChannelError> for SessionError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Timeout { duration } => SessionError::Timeout { duration },
            ChannelError::Remote(remote) => SessionError::Remote(remote),
            other => SessionError::Internal(other.into()),
        }
    }
}
