//! Pre-game join/leave negotiation.
//!
//! ```text
//!            ┌──────── join / leave (re-broadcast, throttled) ───────┐
//!            ▼                                                       │
//!        WAITING ──── start by initiator / roster full ─────► READY ─┘
//!            │
//!            └──── timeout / initiator left / not enough players ──► ABORTED
//! ```
//!
//! A lobby runs a single collector over its own message's controls. Every
//! press goes through one [`SequentialFilter`], so joins and leaves mutate
//! the roster one at a time, and every change schedules a throttled edit of
//! the lobby message.
//!
//! If the roster is still short when the collector ends, the host's
//! automated participant takes a seat when the game allows it. Otherwise the
//! lobby edits its message into an aborted notice and returns
//! [`SessionError::Aborted`].

use std::sync::Arc;

use futures::future;
use tracing::{debug, info};

use crate::collector::{collect, CollectOptions};
use crate::config::Config;
use crate::core::{Actor, MessageRef, ParticipantId, Signal};
use crate::error::SessionError;
use crate::filter::SequentialFilter;
use crate::roster::{lock, Participant, Roster, SharedRoster};
use crate::session::GameSettings;
use crate::surface::{Control, RenderSurface, Source, View};
use crate::throttle::Throttle;

/// Control ids rendered on a lobby message.
pub const START: &str = "start";
pub const JOIN: &str = "join";
pub const LEAVE: &str = "leave";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    Waiting,
    Ready,
    Aborted,
}

pub struct Lobby<D> {
    settings: GameSettings,
    initiator: ParticipantId,
    roster: SharedRoster<D>,
    surface: Arc<dyn RenderSurface>,
    automated: Option<Actor>,
    config: Config,
    refresh: Throttle<()>,
    state: LobbyState,
}

impl<D: Send + 'static> Lobby<D> {
    pub fn new(
        settings: GameSettings,
        initiator: ParticipantId,
        roster: SharedRoster<D>,
        surface: Arc<dyn RenderSurface>,
        config: &Config,
    ) -> Self {
        Self {
            settings,
            initiator,
            roster,
            surface,
            automated: None,
            config: config.clone(),
            refresh: Throttle::new(config.lobby_refresh),
            state: LobbyState::Waiting,
        }
    }

    /// The identity admitted when the lobby ends short of players.
    pub fn with_automated(mut self, automated: Option<Actor>) -> Self {
        self.automated = automated;
        self
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    /// Show the lobby and wait until it is ready or aborted.
    ///
    /// Returns the lobby's message so the game can reuse it.
    pub async fn run(&mut self) -> Result<MessageRef, SessionError> {
        let view = lobby_view(&self.settings, &lock(&self.roster), self.automated.is_some());
        let message = self.surface.send(view).await?;
        info!(game = %self.settings.name, initiator = %self.initiator, "lobby opened");

        let filter = self.filter(message.clone());

        let events = self.surface.open_collector(&Source::Components(message.clone()));
        let collected = collect(events, &filter, CollectOptions::new(self.config.lobby_timeout)).await;
        let timed_out = collected.is_none();
        if timed_out {
            lock(&self.roster).clear();
        }

        // No re-broadcast may land after this point.
        self.stop_refresh().await;

        let abort_reason = {
            let mut roster = lock(&self.roster);
            if !roster.contains(&self.initiator) {
                Some(if timed_out {
                    "Nobody started the game in time."
                } else {
                    "The initiator has abandoned the game."
                })
            } else {
                if roster.len() < self.settings.min_participants && self.settings.allow_automated {
                    if let Some(automated) = &self.automated {
                        roster.add(Participant::new(automated));
                    }
                }
                (roster.len() < self.settings.min_participants)
                    .then_some("The game could not start due to lack of players.")
            }
        };

        if let Some(reason) = abort_reason {
            return self.abort(&message, reason).await;
        }

        self.state = LobbyState::Ready;
        info!(
            game = %self.settings.name,
            participants = lock(&self.roster).len(),
            "lobby ready"
        );
        Ok(message)
    }

    /// Build the filter that owns all roster changes while the lobby runs.
    fn filter(&self, message: MessageRef) -> SequentialFilter {
        let roster = self.roster.clone();
        let settings = self.settings.clone();
        let initiator = self.initiator.clone();
        let has_automated = self.automated.is_some();
        let surface = self.surface.clone();
        let refresh = self.refresh.clone();

        SequentialFilter::new(move |signal: Signal| {
            let (stop, changed) = {
                let mut roster = lock(&roster);
                let actor = &signal.actor;

                let (start, changed) = match signal.custom_id() {
                    Some(START) => (actor.id == initiator, false),
                    Some(JOIN) => (false, roster.add(Participant::new(actor))),
                    Some(LEAVE) => (false, roster.delete(&actor.id).is_some()),
                    _ => (false, false),
                };
                let stop = start
                    || !roster.contains(&initiator)
                    || roster.len() >= settings.max_participants;
                (stop, changed.then(|| lobby_view(&settings, &roster, has_automated)))
            };

            if let Some(view) = changed {
                debug!(actor = %signal.actor.id, "lobby roster changed");
                let surface = surface.clone();
                let message = message.clone();
                let edit = refresh.execute(move || async move { surface.edit(&message, view).await });
                tokio::spawn(async move {
                    if let Err(e) = edit.await {
                        debug!(error = %e, "lobby re-broadcast failed");
                    }
                });
            }

            future::ready(Ok::<_, anyhow::Error>(stop))
        })
        .with_ack_deadline(self.config.ack_deadline)
    }

    /// Drop pending re-broadcasts and wait out the one already running.
    async fn stop_refresh(&self) {
        self.refresh.clear(Ok(()));
        self.refresh.settle().await;
    }

    async fn abort(&mut self, message: &MessageRef, reason: &str) -> Result<MessageRef, SessionError> {
        self.stop_refresh().await;
        self.state = LobbyState::Aborted;
        info!(game = %self.settings.name, reason, "lobby aborted");

        let view = View::new(&self.settings.name)
            .body(format!("The game has been aborted.\n{reason}"));
        self.surface.edit(message, view).await?;
        Err(SessionError::Aborted {
            reason: reason.to_string(),
        })
    }
}

/// Render the waiting lobby.
///
/// Start is disabled while too few participants are present, counting the
/// seat the automated participant would take.
fn lobby_view<D>(settings: &GameSettings, roster: &Roster<D>, has_automated: bool) -> View {
    let bonus = usize::from(settings.allow_automated && has_automated && !roster.has_automated());
    let start_disabled = roster.len() < settings.min_participants.saturating_sub(bonus);

    let names: Vec<&str> = roster.iter().map(|p| p.name.as_str()).collect();
    View::new(&settings.name)
        .body(format!("Players: {}", names.join(", ")))
        .footer(format!(
            "Player count: {} of {}-{}",
            roster.len(),
            settings.min_participants,
            settings.max_participants
        ))
        .control(Control::new(START, "Start").disabled(start_disabled))
        .control(Control::new(JOIN, "Join"))
        .control(Control::new(LEAVE, "Leave"))
}
