//! Game sessions - the abstract turn-based state machine.
//!
//! ```text
//! INIT ──► (LOBBY ──►) ACTIVE ──► TERMINATED
//! ```
//!
//! A [`Game`] only supplies its settings and a `main`. The session does the
//! rest:
//!
//! - [`Session::run`] claims the initiator's slot in the [`SessionIndex`],
//!   runs `main`, and releases the slot however `main` ended.
//! - [`Session::initialize`] absorbs pre-declared participants and either
//!   renders the first view directly or runs a [`Lobby`] first and reuses
//!   its message.
//! - [`Session::play`] drives a standard turn loop over [`TurnRules`]:
//!   automated participants move immediately, everyone else is awaited
//!   through a collector that only lets the current participant act.
//! - [`Session::finish`] and [`Session::abort`] end the game. Both return a
//!   control error that `main` propagates with `?`, so a finished game
//!   unwinds straight out of whatever loop it was in.
//!
//! # Example
//!
//! ```ignore
//! struct Coin;
//!
//! #[async_trait]
//! impl Game for Coin {
//!     type Data = ();
//!
//!     fn settings(&self) -> GameSettings {
//!         GameSettings::new("Coin flip").participants(1, 1)
//!     }
//!
//!     async fn main(&mut self, session: &mut Session<()>) -> Result<(), SessionError> {
//!         session.initialize(vec![], |_| View::new("Coin flip")).await?;
//!         let side = if fastrand::bool() { "heads" } else { "tails" };
//!         session.finish(View::new("Coin flip").body(side)).await
//!     }
//! }
//!
//! let outcome = host.start(&mut Coin, initiator, surface).await?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collector::{self, CollectOptions};
use crate::config::Config;
use crate::core::{Actor, MessageRef, SessionId, Signal, TokenId};
use crate::error::SessionError;
use crate::filter::SequentialFilter;
use crate::host::ComponentTicket;
use crate::index::SessionIndex;
use crate::lobby::Lobby;
use crate::registry::CorrelationRegistry;
use crate::roster::{self, Participant, Roster, SharedRoster};
use crate::surface::{Notice, RenderSurface, Source, View};

// =============================================================================
// Settings and Traits
// =============================================================================

/// Static description of a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSettings {
    pub name: String,
    pub min_participants: usize,
    pub max_participants: usize,
    /// Whether the host's automated participant may take a seat.
    pub allow_automated: bool,
}

impl GameSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_participants: 2,
            max_participants: 26,
            allow_automated: true,
        }
    }

    pub fn participants(mut self, min: usize, max: usize) -> Self {
        self.min_participants = min;
        self.max_participants = max.max(min);
        self
    }

    pub fn allow_automated(mut self, allow: bool) -> Self {
        self.allow_automated = allow;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Lobby,
    Active,
    Terminated,
}

/// How a session ended, when it ended on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Aborted(String),
}

/// A game that runs inside a [`Session`].
#[async_trait]
pub trait Game: Send {
    /// Per-participant turn data.
    type Data: Send + 'static;

    fn settings(&self) -> GameSettings;

    /// Play the game. End with [`Session::finish`] or [`Session::abort`].
    async fn main(&mut self, session: &mut Session<Self::Data>) -> Result<(), SessionError>;
}

/// Result of applying one move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// Advance to the next participant.
    Continue,
    /// The game is over; render this view as the final state.
    Finish(View),
    /// Stop the game with this reason.
    Abort(String),
}

/// Where turn input comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnInput {
    /// Presses on the session message's controls.
    #[default]
    Components,
    /// Free-form messages.
    Messages,
}

/// Rules for the standard turn loop driven by [`Session::play`].
pub trait TurnRules<D>: Send + Sync {
    type Move: Send;

    /// Render the current state.
    fn view(&self, roster: &Roster<D>) -> View;

    /// Interpret a signal from the current participant. `None` keeps
    /// waiting for a valid move.
    fn read_move(&self, signal: &Signal, roster: &Roster<D>) -> Option<Self::Move>;

    /// Compute an automated participant's move.
    fn automated_move(&mut self, roster: &Roster<D>) -> Self::Move;

    /// Apply the current participant's move.
    fn apply(&mut self, mv: Self::Move, roster: &mut Roster<D>) -> Turn;

    /// Called when the current participant lets the turn time run out.
    fn on_timeout(&mut self, roster: &mut Roster<D>) -> Turn {
        let name = roster
            .current()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        Turn::Abort(format!("{name} did not play in time."))
    }

    fn input(&self) -> TurnInput {
        TurnInput::Components
    }
}

// =============================================================================
// Session
// =============================================================================

pub struct Session<D> {
    id: SessionId,
    settings: GameSettings,
    initiator: Actor,
    roster: SharedRoster<D>,
    surface: Arc<dyn RenderSurface>,
    message: Option<MessageRef>,
    phase: Phase,
    config: Config,
    automated: Option<Actor>,
    components: CorrelationRegistry<ComponentTicket>,
    index: SessionIndex,
}

impl<D: Send + 'static> Session<D> {
    /// A session that claims its initiator's slot in `index` when it runs.
    ///
    /// Only sessions sharing an index conflict with each other. It gets its
    /// own component registry unless one is supplied; sessions started
    /// through a [`Host`](crate::Host) share the host's index and registry.
    pub fn new(
        settings: GameSettings,
        initiator: Actor,
        surface: Arc<dyn RenderSurface>,
        index: SessionIndex,
    ) -> Self {
        let mut roster = Roster::new();
        roster.add(Participant::new(&initiator));
        let config = Config::default();

        Self {
            id: SessionId::new(),
            settings,
            initiator,
            roster: Arc::new(Mutex::new(roster)),
            surface,
            message: None,
            phase: Phase::Init,
            components: CorrelationRegistry::with_default_ttl(config.token_ttl),
            config,
            automated: None,
            index,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_components(mut self, components: CorrelationRegistry<ComponentTicket>) -> Self {
        self.components = components;
        self
    }

    /// The host's own automated identity.
    pub fn with_automated(mut self, automated: Option<Actor>) -> Self {
        self.automated = automated;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn initiator(&self) -> &Actor {
        &self.initiator
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn message(&self) -> Option<&MessageRef> {
        self.message.as_ref()
    }

    pub fn surface(&self) -> &Arc<dyn RenderSurface> {
        &self.surface
    }

    /// Lock the roster. Do not hold the guard across an `.await`.
    pub fn roster(&self) -> MutexGuard<'_, Roster<D>> {
        roster::lock(&self.roster)
    }

    pub fn shared_roster(&self) -> SharedRoster<D> {
        self.roster.clone()
    }

    /// Run `game` to completion.
    ///
    /// Fails with [`SessionError::Conflict`] before `main` runs if the
    /// initiator already owns a live session. Finishing and aborting come
    /// back as a [`SessionOutcome`]; anything else is an error.
    pub async fn run<G>(mut self, game: &mut G) -> Result<SessionOutcome, SessionError>
    where
        G: Game<Data = D>,
    {
        let _live = self.index.register(&self.initiator.id, self.id)?;
        info!(
            session = %self.id,
            game = %self.settings.name,
            initiator = %self.initiator.id,
            "session started"
        );

        let result = game.main(&mut self).await;
        self.phase = Phase::Terminated;

        match result {
            Ok(()) | Err(SessionError::Complete) => {
                info!(session = %self.id, "session complete");
                Ok(SessionOutcome::Completed)
            }
            Err(SessionError::Aborted { reason }) => {
                info!(session = %self.id, reason = %reason, "session aborted");
                Ok(SessionOutcome::Aborted(reason))
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, category = %e.category(), "session failed");
                Err(e)
            }
        }
    }

    /// Seat pre-declared participants and deliver the first view.
    ///
    /// With enough participants the view from `render` is sent directly.
    /// Otherwise a lobby runs first and its message is edited into the view.
    pub async fn initialize(
        &mut self,
        declared: Vec<Actor>,
        render: impl FnOnce(&mut Roster<D>) -> View + Send,
    ) -> Result<MessageRef, SessionError> {
        if !self.surface.can_deliver() {
            return Err(SessionError::user(
                "Games can not be played where their messages can't be delivered.",
            ));
        }
        self.declare(declared)?;

        let ready = self.roster().len() >= self.settings.min_participants;
        let message = if ready {
            let view = render(&mut self.roster());
            self.surface.send(view).await?
        } else {
            self.phase = Phase::Lobby;
            let message = Lobby::new(
                self.settings.clone(),
                self.initiator.id.clone(),
                self.roster.clone(),
                self.surface.clone(),
                &self.config,
            )
            .with_automated(self.automated.clone())
            .run()
            .await?;

            let view = render(&mut self.roster());
            self.surface.edit(&message, view).await?;
            message
        };

        self.phase = Phase::Active;
        self.index
            .attach(&self.initiator.id, self.id, message.clone());
        self.message = Some(message.clone());
        debug!(session = %self.id, participants = self.roster().len(), "session active");
        Ok(message)
    }

    fn declare(&mut self, declared: Vec<Actor>) -> Result<(), SessionError> {
        let automated_id = self.automated.as_ref().map(|a| &a.id);
        let mut roster = roster::lock(&self.roster);

        for actor in declared {
            if actor.automated
                && (!self.settings.allow_automated || automated_id != Some(&actor.id))
            {
                return Err(SessionError::user(format!(
                    "{} is automated and can't participate in the game.",
                    actor.name
                )));
            }
            if roster.contains(&actor.id) {
                return Err(SessionError::user(format!(
                    "{} has been specified more than once.",
                    actor.name
                )));
            }
            if roster.len() >= self.settings.max_participants {
                return Err(SessionError::user(format!(
                    "{} can be played by at most {} participants.",
                    self.settings.name, self.settings.max_participants
                )));
            }
            roster.add(Participant::new(&actor));
        }
        Ok(())
    }

    /// Drive the standard turn loop until the rules finish or abort it.
    pub async fn play<R: TurnRules<D>>(&mut self, rules: &mut R) -> Result<(), SessionError> {
        loop {
            let current = self.roster().current().map(|p| p.automated);
            let Some(automated) = current else {
                return self.abort("There is nobody left to play.").await;
            };

            let turn = if automated {
                let mut roster = self.roster();
                let mv = rules.automated_move(&roster);
                rules.apply(mv, &mut roster)
            } else {
                match self.await_move(rules).await? {
                    Some(mv) => rules.apply(mv, &mut self.roster()),
                    None => rules.on_timeout(&mut self.roster()),
                }
            };

            match turn {
                Turn::Continue => {
                    let view = {
                        let mut roster = self.roster();
                        roster.next();
                        rules.view(&roster)
                    };
                    self.render(view).await?;
                }
                Turn::Finish(view) => return self.finish(view).await,
                Turn::Abort(reason) => return self.abort(&reason).await,
            }
        }
    }

    /// Wait up to the turn timeout for a valid move from the current
    /// participant. Invalid moves are ignored and waiting continues.
    pub async fn await_move<R: TurnRules<D>>(&self, rules: &R) -> Result<Option<R::Move>, SessionError> {
        let source = match rules.input() {
            TurnInput::Components => Source::Components(self.require_message()?.clone()),
            TurnInput::Messages => Source::Messages,
        };
        let deadline = Instant::now() + self.config.turn_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some(signal) = self.await_turn(source.clone(), remaining).await else {
                return Ok(None);
            };
            let mv = rules.read_move(&signal, &self.roster());
            if let Some(mv) = mv {
                return Ok(Some(mv));
            }
            debug!(session = %self.id, actor = %signal.actor.id, "ignored invalid move");
        }
    }

    /// Wait for one signal from the participant whose turn it is.
    pub async fn await_turn(&self, source: Source, time: Duration) -> Option<Signal> {
        let current = self.roster().current().map(|p| p.id.clone())?;
        let filter = SequentialFilter::new(move |signal: Signal| {
            future::ready(Ok::<_, anyhow::Error>(signal.actor.id == current))
        })
        .with_ack_deadline(self.config.ack_deadline);

        self.collect(source, &filter, CollectOptions::new(time))
            .await
            .and_then(|mut signals| signals.pop())
    }

    /// Collect accepted signals from `source`. See [`collector::collect`].
    pub async fn collect(
        &self,
        source: Source,
        filter: &SequentialFilter,
        options: CollectOptions,
    ) -> Option<Vec<Signal>> {
        collector::collect(self.surface.open_collector(&source), filter, options).await
    }

    /// Replace the session message with `view`.
    pub async fn render(&self, view: View) -> Result<(), SessionError> {
        let message = self.require_message()?;
        self.surface.edit(message, view).await?;
        Ok(())
    }

    /// Render the final view without controls and end the game.
    ///
    /// Always returns [`SessionError::Complete`].
    pub async fn finish(&mut self, view: View) -> Result<(), SessionError> {
        self.phase = Phase::Terminated;
        self.render(view.without_controls()).await?;
        Err(SessionError::Complete)
    }

    /// Show why the game stopped and end it.
    ///
    /// Always returns [`SessionError::Aborted`] unless showing the reason
    /// itself fails.
    pub async fn abort(&mut self, reason: &str) -> Result<(), SessionError> {
        self.phase = Phase::Terminated;
        match &self.message {
            Some(message) => {
                let view = View::new(&self.settings.name)
                    .body(format!("The game has been aborted.\n{reason}"));
                self.surface.edit(message, view).await?;
            }
            None => self.surface.notify(Notice::public(reason)).await?,
        }
        Err(SessionError::Aborted {
            reason: reason.to_string(),
        })
    }

    /// Register a control that resumes later through the host's component
    /// router, even after this session has ended.
    ///
    /// Render a control with the returned id; pressing it runs `handler`
    /// with `payload`.
    pub fn issue_component(
        &self,
        handler: impl Into<String>,
        payload: Value,
        ttl: Option<Duration>,
    ) -> TokenId {
        let ticket = ComponentTicket {
            handler: handler.into(),
            payload,
            origin: Some(self.id),
        };
        self.components
            .issue(ticket, ttl.unwrap_or(self.config.token_ttl))
    }

    fn require_message(&self) -> Result<&MessageRef, SessionError> {
        self.message
            .as_ref()
            .ok_or_else(|| SessionError::Internal(anyhow!("session {} has not delivered a message yet", self.id)))
    }
}

impl<D> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("game", &self.settings.name)
            .field("initiator", &self.initiator.id)
            .field("phase", &self.phase)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = GameSettings::new("Nim");
        assert_eq!(settings.min_participants, 2);
        assert_eq!(settings.max_participants, 26);
        assert!(settings.allow_automated);
    }

    #[test]
    fn test_participants_never_inverts_range() {
        let settings = GameSettings::new("Solo").participants(3, 1);
        assert_eq!(settings.min_participants, 3);
        assert_eq!(settings.max_participants, 3);
    }
}
