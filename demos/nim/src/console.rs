//! A render surface on the terminal.
//!
//! Every input line is `<player> <action>`. `<action>` is pressed as a
//! control id on the latest message (`alice take:2`, `bob join`), unless it
//! starts with `say `, in which case the rest is a free-form message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use huddle_core::{
    async_trait, lines, Actor, MessageRef, Notice, RenderSurface, Signal, Signals, Source, View,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::debug;

pub struct ConsoleSurface {
    next_message: AtomicU64,
    views: Mutex<HashMap<MessageRef, View>>,
    latest: Mutex<Option<MessageRef>>,
    signals: broadcast::Sender<(Source, Signal)>,
}

impl ConsoleSurface {
    /// Start reading stdin. Every parsed signal is also forwarded on the
    /// returned receiver so the host can route control presses.
    pub fn start() -> (Arc<Self>, mpsc::UnboundedReceiver<Signal>) {
        let (signals, _) = broadcast::channel(64);
        let surface = Arc::new(Self {
            next_message: AtomicU64::new(1),
            views: Mutex::new(HashMap::new()),
            latest: Mutex::new(None),
            signals,
        });

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader = surface.clone();
        tokio::spawn(async move {
            let mut input = lines(tokio::io::stdin());
            while let Some(line) = input.next().await {
                let Some((source, signal)) = reader.parse(&line) else {
                    println!("?? expected `<player> <action>`");
                    continue;
                };
                if inbound_tx.send(signal.clone()).is_err() {
                    break;
                }
                let listeners = reader.signals.send((source, signal)).unwrap_or(0);
                debug!(listeners, "console input delivered");
            }
            debug!("console input closed");
        });

        (surface, inbound_rx)
    }

    fn parse(&self, line: &str) -> Option<(Source, Signal)> {
        let (name, action) = line.trim().split_once(' ')?;
        let actor = Actor::new(name, name);

        if let Some(text) = action.strip_prefix("say ") {
            return Some((Source::Messages, Signal::message(actor, text)));
        }
        let latest = self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()?;
        Some((Source::Components(latest), Signal::component(actor, action.trim())))
    }

    fn show(&self, tag: &str, message: &MessageRef, view: &View) {
        println!();
        println!("== {} [{message}{tag}]", view.title);
        if !view.body.is_empty() {
            println!("{}", view.body);
        }
        if let Some(footer) = &view.footer {
            println!("({footer})");
        }
        let controls: Vec<String> = view
            .controls
            .iter()
            .filter(|control| control.enabled)
            .map(|control| format!("[{}: {}]", control.id, control.label))
            .collect();
        if !controls.is_empty() {
            println!("{}", controls.join(" "));
        }
    }
}

#[async_trait]
impl RenderSurface for ConsoleSurface {
    async fn send(&self, view: View) -> anyhow::Result<MessageRef> {
        let message = MessageRef::new(format!("#{}", self.next_message.fetch_add(1, Ordering::Relaxed)));
        self.show("", &message, &view);
        self.views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(message.clone(), view);
        *self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message.clone());
        Ok(message)
    }

    async fn edit(&self, message: &MessageRef, view: View) -> anyhow::Result<()> {
        let mut views = self.views.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = views
            .get_mut(message)
            .ok_or_else(|| anyhow!("no message {message} on the console"))?;
        if *slot != view {
            self.show(" edited", message, &view);
            *slot = view;
        }
        Ok(())
    }

    fn open_collector(&self, source: &Source) -> Signals {
        stream::unfold(
            (self.signals.subscribe(), source.clone()),
            |(mut rx, source)| async move {
                loop {
                    match rx.recv().await {
                        Ok((target, signal)) if target == source => return Some((signal, (rx, source))),
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )
        .boxed()
    }

    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        println!("** {}", notice.text);
        Ok(())
    }
}
