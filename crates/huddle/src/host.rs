//! The inbound edge: starts sessions, routes delayed control presses, and
//! turns failures into notices.
//!
//! ```text
//!   platform event ──► Host::dispatch(signal)
//!                         │
//!                         ├─ custom_id names a live component token?
//!                         │     └─► consume, run the named handler
//!                         │
//!                         └─ otherwise: not ours (an active collector
//!                            sees it through its surface)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let host = Host::new(Config::from_env()?)
//!     .with_automated(Actor::automated("house", "House"));
//!
//! host.on_component("rematch", |call| async move {
//!     let mut game = Nim::from_payload(&call.payload)?;
//!     call.host.start(&mut game, call.signal.actor.clone(), call.surface.clone()).await?;
//!     Ok(())
//! });
//!
//! if let Err(e) = host.start(&mut Nim::new(21), initiator, surface.clone()).await {
//!     host.report(surface.as_ref(), &e).await;
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::core::{Actor, SessionId, Signal};
use crate::error::{ErrorCategory, SessionError};
use crate::index::SessionIndex;
use crate::registry::{CorrelationRegistry, Expire, Expired};
use crate::session::{Game, GameSettings, Session, SessionOutcome};
use crate::surface::{Notice, RenderSurface};

// =============================================================================
// Component Tickets
// =============================================================================

/// Registry entry for a delayed control callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentTicket {
    /// Name the handler was registered under with [`Host::on_component`].
    pub handler: String,
    pub payload: Value,
    /// Session that issued the control, if any.
    pub origin: Option<SessionId>,
}

impl Expire for ComponentTicket {
    fn expire(self, expired: Expired) {
        debug!(token = %expired.id, handler = %self.handler, "component expired unpressed");
    }
}

/// Everything a component handler receives.
pub struct ComponentCall {
    pub host: Host,
    pub signal: Signal,
    pub payload: Value,
    pub origin: Option<SessionId>,
    pub surface: Arc<dyn RenderSurface>,
}

type ComponentHandler =
    Arc<dyn Fn(ComponentCall) -> BoxFuture<'static, Result<(), SessionError>> + Send + Sync>;

// =============================================================================
// Host
// =============================================================================

/// Owns what sessions share: configuration, the live-session index, the
/// component registry and its handlers.
#[derive(Clone)]
pub struct Host {
    config: Config,
    index: SessionIndex,
    components: CorrelationRegistry<ComponentTicket>,
    handlers: Arc<DashMap<String, ComponentHandler>>,
    automated: Option<Actor>,
}

impl Host {
    pub fn new(config: Config) -> Self {
        Self {
            components: CorrelationRegistry::with_default_ttl(config.token_ttl),
            config,
            index: SessionIndex::new(),
            handlers: Arc::new(DashMap::new()),
            automated: None,
        }
    }

    /// The identity that takes a seat when games allow an automated
    /// participant.
    pub fn with_automated(mut self, automated: Actor) -> Self {
        self.automated = Some(automated);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &SessionIndex {
        &self.index
    }

    pub fn components(&self) -> &CorrelationRegistry<ComponentTicket> {
        &self.components
    }

    pub fn automated(&self) -> Option<&Actor> {
        self.automated.as_ref()
    }

    /// Register the handler for components issued under `name`.
    pub fn on_component<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(ComponentCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |call| handler(call).boxed()));
    }

    /// A session wired to this host's index, registry and automated identity.
    pub fn session<D: Send + 'static>(
        &self,
        settings: GameSettings,
        initiator: Actor,
        surface: Arc<dyn RenderSurface>,
    ) -> Session<D> {
        Session::new(settings, initiator, surface, self.index.clone())
            .with_config(self.config.clone())
            .with_components(self.components.clone())
            .with_automated(self.automated.clone())
    }

    /// Run `game` for `initiator` on `surface`.
    pub async fn start<G: Game>(
        &self,
        game: &mut G,
        initiator: Actor,
        surface: Arc<dyn RenderSurface>,
    ) -> Result<SessionOutcome, SessionError> {
        self.session(game.settings(), initiator, surface)
            .run(game)
            .await
    }

    /// Route a control press to the handler of the component it names.
    ///
    /// Returns `false` if the press names no live component. Handler failures
    /// are reported on `surface`.
    pub async fn dispatch(&self, signal: Signal, surface: Arc<dyn RenderSurface>) -> bool {
        let Some(ticket) = self.components.consume(&signal) else {
            return false;
        };

        let handler = self
            .handlers
            .get(&ticket.handler)
            .map(|entry| entry.value().clone());
        let Some(handler) = handler else {
            warn!(handler = %ticket.handler, "no handler registered for component");
            self.report(surface.as_ref(), &SessionError::Internal(anyhow::anyhow!(
                "no handler registered for `{}`",
                ticket.handler
            )))
            .await;
            return true;
        };

        debug!(handler = %ticket.handler, actor = %signal.actor.id, "dispatching component");
        let call = ComponentCall {
            host: self.clone(),
            signal,
            payload: ticket.payload,
            origin: ticket.origin,
            surface: surface.clone(),
        };
        if let Err(e) = handler(call).await {
            self.report(surface.as_ref(), &e).await;
        }
        true
    }

    /// Show `error` to the user as far as it is safe to.
    ///
    /// Control signals are dropped. User errors and conflicts show their own
    /// message. Everything else is logged and shown as a generic notice.
    pub async fn report(&self, surface: &dyn RenderSurface, error: &SessionError) {
        let category = error.category();
        match category {
            ErrorCategory::Control => return,
            ErrorCategory::User | ErrorCategory::Conflict => {
                debug!(error = %error, category = %category, "reporting user-facing error");
            }
            _ => error!(error = %error, category = %category, "unhandled session failure"),
        }

        let notice = Notice::private(error.safe_message());
        if let Err(e) = surface.notify(notice).await {
            warn!(error = %e, "failed to deliver error notice");
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("live_sessions", &self.index.len())
            .field("live_components", &self.components.len())
            .field("automated", &self.automated)
            .finish_non_exhaustive()
    }
}
