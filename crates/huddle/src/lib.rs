//! # Huddle
//!
//! An engine for long-running, multi-step interactive sessions: games and
//! workflows that wait seconds to minutes for people to press a button or
//! type a reply, and that sometimes hand work to another process and wait
//! for its answer.
//!
//! ## Core Concepts
//!
//! Huddle is built from three mechanisms:
//! - [`CorrelationRegistry`] = resume later by id (TTL-bound tokens)
//! - [`SequentialFilter`] = decide on concurrent signals one at a time
//! - [`Session`] = lobby, turn loop, terminal view
//!
//! The key principle: **every wait is bounded**. Tokens expire, collectors
//! time out, lobbies close. Nothing waits forever for an actor who left.
//!
//! ## Architecture
//!
//! ```text
//! Platform adapter
//!     │
//!     ▼ Signal { actor, Component | Message }
//! Host::dispatch ───────────────────────────────────┐
//!     │                                             │
//!     │ custom_id names a live token?               │ no
//!     ▼                                             ▼
//! CorrelationRegistry::consume              RenderSurface::open_collector
//!     │                                             │
//!     ▼                                             ▼
//! component handler                         SequentialFilter ──► Roster
//!                                                   │              │
//!                                                   ▼              ▼
//!                                           Session turn loop   Throttle
//!                                                   │              │
//!                                                   └──► RenderSurface::edit
//!
//! ProcessChannel ◄── Envelope (id, call | result | error) ──► ProcessChannel
//!     └─ pending calls are CorrelationRegistry tokens
//! ```
//!
//! ## Key Invariants
//!
//! 1. **A token fires once** - consumed or expired, never both
//! 2. **Filters are sequential** - predicate N+1 starts after N settles
//! 3. **Acknowledge on arrival** - never wait for a filter's turn to ack
//! 4. **One live session per initiator** - checked before `main` runs
//! 5. **Every inbound call is answered** - result or error, same id
//! 6. **Only safe messages reach users** - see [`SessionError::safe_message`]
//!
//! ## Example
//!
//! ```ignore
//! use huddle_core::{Config, Host, Actor};
//!
//! let host = Host::new(Config::from_env()?)
//!     .with_automated(Actor::automated("house", "House"));
//!
//! let outcome = host.start(&mut MyGame::new(), initiator, surface.clone()).await;
//! if let Err(e) = &outcome {
//!     host.report(surface.as_ref(), e).await;
//! }
//! ```

// Core modules
mod channel;
mod collector;
mod config;
mod core;
mod envelope;
mod error;
mod filter;
mod host;
mod index;
mod lobby;
mod registry;
mod roster;
mod session;
mod surface;
mod throttle;
mod transport;

// Testing utilities are in the separate huddle-testing crate

// Re-export identity and signal types
pub use crate::core::{Acknowledge, Actor, MessageRef, ParticipantId, SessionId, Signal, SignalKind, TokenId};

// Re-export configuration
pub use config::{parse_duration, Config};

// Re-export error types
pub use error::{
    ChannelError, ErrorCategory, RegistryError, SessionError, ThrottleError, GENERIC_FAILURE,
};

// Re-export registry types
pub use registry::{Continuation, CorrelationRegistry, Expire, Expired, TokenKey, DEFAULT_TOKEN_TTL};

// Re-export process channel types
pub use channel::{Operations, ProcessChannel, UNKNOWN_OPERATION};
pub use envelope::{Body, Envelope, RemoteError};
pub use transport::{lines, memory_pair, Frames, LineTransport, MemoryTransport, Transport};

// Re-export signal processing types
pub use collector::{collect, CollectOptions};
pub use filter::{SequentialFilter, Verdict};
pub use throttle::{Outcome, Throttle};

// Re-export session types
pub use host::{ComponentCall, ComponentTicket, Host};
pub use index::{LiveGuard, LiveSession, SessionIndex};
pub use lobby::{Lobby, LobbyState, JOIN, LEAVE, START};
pub use roster::{Participant, Roster, SharedRoster};
pub use session::{Game, GameSettings, Phase, Session, SessionOutcome, Turn, TurnInput, TurnRules};
pub use surface::{Control, Notice, RenderSurface, Signals, Source, View};

// Re-export commonly used external types
pub use async_trait::async_trait;
