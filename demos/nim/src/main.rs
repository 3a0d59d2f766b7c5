//! Nim on the console.
//!
//! ```text
//! cargo run -p nim-demo -- alice
//! > bob join
//! > alice start
//! > alice take:3
//! ```
//!
//! Results are tallied by a ledger child process (`nim --ledger`) over a
//! process channel. Timings come from `HUDDLE_*` variables (see
//! [`huddle_core::Config`]); `NIM_STONES` sets the pile size.

mod console;
mod ledger;
mod nim;

use anyhow::Result;
use huddle_core::{Actor, ComponentCall, Config, Host, SessionError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::console::ConsoleSurface;
use crate::nim::{Nim, REMATCH};

const DEFAULT_STONES: u32 = 15;
const DEFAULT_LOG_FILTER: &str = "info,huddle_core=debug";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env first so it can set RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize logging; stdout belongs to the game (or the ledger wire)
    tracing_subscriber::registry()
        .with(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let first = args.next();
    if first.as_deref() == Some("--ledger") {
        ledger::serve().await;
        return Ok(());
    }

    let config = Config::from_env()?;
    let stones = match std::env::var("NIM_STONES") {
        Ok(raw) => raw.parse()?,
        Err(_) => DEFAULT_STONES,
    };
    let name = first.unwrap_or_else(|| "alice".to_string());

    let (_child, ledger) = ledger::spawn(&config)?;
    let host = Host::new(config).with_automated(Actor::automated("house", "House"));

    let rematch_ledger = ledger.clone();
    host.on_component(REMATCH, move |call: ComponentCall| {
        let ledger = rematch_ledger.clone();
        async move {
            let stones = call
                .payload
                .get("stones")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| SessionError::user("That rematch offer is malformed."))?;
            let mut game = Nim::new(stones, Some(ledger));
            let outcome = call
                .host
                .start(&mut game, call.signal.actor.clone(), call.surface.clone())
                .await?;
            info!(?outcome, "rematch over");
            Ok::<(), SessionError>(())
        }
    });

    let (surface, mut inbound) = ConsoleSurface::start();
    info!(initiator = %name, stones, "starting nim");

    // Control presses that name a live component resume here, even after
    // the game that issued them is over.
    let dispatcher = tokio::spawn({
        let host = host.clone();
        let surface = surface.clone();
        async move {
            while let Some(signal) = inbound.recv().await {
                let host = host.clone();
                let surface = surface.clone();
                tokio::spawn(async move { host.dispatch(signal, surface).await });
            }
        }
    });

    let mut game = Nim::new(stones, Some(ledger));
    match host.start(&mut game, Actor::new(name.as_str(), name.as_str()), surface.clone()).await {
        Ok(outcome) => info!(?outcome, "game over"),
        Err(e) => host.report(surface.as_ref(), &e).await,
    }

    if let Err(e) = dispatcher.await {
        warn!(error = %e, "dispatcher stopped");
    }
    Ok(())
}

/// `RUST_LOG` directives if set and valid, otherwise the default.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
