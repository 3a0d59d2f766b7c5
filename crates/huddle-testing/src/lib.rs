//! Testing utilities for Huddle sessions.
//!
//! [`ScriptedSurface`] stands in for a chat platform: it records every view
//! it is asked to deliver and lets a test play the part of the people
//! pressing buttons and typing messages.
//!
//! # Example
//!
//! ```ignore
//! use huddle_testing::ScriptedSurface;
//!
//! let surface = ScriptedSurface::new();
//! let run = tokio::spawn(host.start(&mut game, alice.clone(), surface.clone()));
//!
//! surface.wait_for_collectors(1).await;
//! surface.click(&bob, "join");
//!
//! assert_eq!(surface.last_view().unwrap().body, "Players: alice, bob");
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use huddle_core::{Acknowledge, Actor, MessageRef, Notice, RenderSurface, Signal, Signals, Source, View};

/// How long the `wait_for_*` helpers poll before giving up.
const WAIT_LIMIT: usize = 10_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Scripted Surface
// =============================================================================

/// One delivery recorded by a [`ScriptedSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Sent { message: MessageRef, view: View },
    Edited { message: MessageRef, view: View },
}

impl Frame {
    pub fn message(&self) -> &MessageRef {
        match self {
            Frame::Sent { message, .. } | Frame::Edited { message, .. } => message,
        }
    }

    pub fn view(&self) -> &View {
        match self {
            Frame::Sent { view, .. } | Frame::Edited { view, .. } => view,
        }
    }
}

/// In-memory [`RenderSurface`] driven by the test.
///
/// Signals pushed while no collector listens on their source are lost, the
/// way a real platform drops presses nobody is waiting for. Use
/// [`wait_for_collectors`](Self::wait_for_collectors) before pushing.
pub struct ScriptedSurface {
    deliverable: bool,
    frames: Mutex<Vec<Frame>>,
    notices: Mutex<Vec<Notice>>,
    signals: broadcast::Sender<(Source, Signal)>,
    opened: AtomicUsize,
}

impl ScriptedSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    /// A surface whose conversation can't receive views.
    pub fn undeliverable() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    fn build(deliverable: bool) -> Self {
        let (signals, _) = broadcast::channel(256);
        Self {
            deliverable,
            frames: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            signals,
            opened: AtomicUsize::new(0),
        }
    }

    /// Deliver `signal` to collectors listening on `source`.
    ///
    /// Returns the number of collectors it reached.
    pub fn push(&self, source: Source, signal: Signal) -> usize {
        self.signals.send((source, signal)).unwrap_or(0)
    }

    /// Press `custom_id` on the most recently sent message.
    pub fn click(&self, actor: &Actor, custom_id: &str) -> usize {
        match self.last_sent() {
            Some(message) => self.click_on(&message, actor, custom_id),
            None => 0,
        }
    }

    pub fn click_on(&self, message: &MessageRef, actor: &Actor, custom_id: &str) -> usize {
        self.push(
            Source::Components(message.clone()),
            Signal::component(actor.clone(), custom_id),
        )
    }

    /// Write a free-form message.
    pub fn say(&self, actor: &Actor, content: &str) -> usize {
        self.push(Source::Messages, Signal::message(actor.clone(), content))
    }

    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.frames).clone()
    }

    /// The view most recently sent or edited.
    pub fn last_view(&self) -> Option<View> {
        lock(&self.frames).last().map(|frame| frame.view().clone())
    }

    /// The message most recently sent.
    pub fn last_sent(&self) -> Option<MessageRef> {
        lock(&self.frames).iter().rev().find_map(|frame| match frame {
            Frame::Sent { message, .. } => Some(message.clone()),
            Frame::Edited { .. } => None,
        })
    }

    /// Number of edits made to any message.
    pub fn edits(&self) -> usize {
        lock(&self.frames)
            .iter()
            .filter(|frame| matches!(frame, Frame::Edited { .. }))
            .count()
    }

    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }

    /// Collectors opened so far, including closed ones.
    pub fn collectors_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Wait until `count` collectors have been opened in total and one of
    /// them is still listening.
    pub async fn wait_for_collectors(&self, count: usize) {
        self.wait_until(|surface| {
            surface.collectors_opened() >= count && surface.signals.receiver_count() > 0
        })
        .await
    }

    /// Wait until at least `count` frames have been recorded.
    pub async fn wait_for_frames(&self, count: usize) {
        self.wait_until(|surface| lock(&surface.frames).len() >= count)
            .await
    }

    /// Wait until at least `count` notices have been shown.
    pub async fn wait_for_notices(&self, count: usize) {
        self.wait_until(|surface| lock(&surface.notices).len() >= count)
            .await
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        for _ in 0..WAIT_LIMIT {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("scripted surface condition not reached");
    }
}

#[async_trait]
impl RenderSurface for ScriptedSurface {
    fn can_deliver(&self) -> bool {
        self.deliverable
    }

    async fn send(&self, view: View) -> anyhow::Result<MessageRef> {
        if !self.deliverable {
            bail!("conversation is not deliverable");
        }
        let message = MessageRef::new(format!("msg-{}", Uuid::new_v4()));
        lock(&self.frames).push(Frame::Sent {
            message: message.clone(),
            view,
        });
        Ok(message)
    }

    async fn edit(&self, message: &MessageRef, view: View) -> anyhow::Result<()> {
        let mut frames = lock(&self.frames);
        if !frames.iter().any(|frame| frame.message() == message) {
            return Err(anyhow!("unknown message {message}"));
        }
        frames.push(Frame::Edited {
            message: message.clone(),
            view,
        });
        Ok(())
    }

    fn open_collector(&self, source: &Source) -> Signals {
        let rx = self.signals.subscribe();
        self.opened.fetch_add(1, Ordering::SeqCst);

        stream::unfold((rx, source.clone()), |(mut rx, source)| async move {
            loop {
                match rx.recv().await {
                    Ok((target, signal)) if target == source => return Some((signal, (rx, source))),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn notify(&self, notice: Notice) -> anyhow::Result<()> {
        lock(&self.notices).push(notice);
        Ok(())
    }
}

impl std::fmt::Debug for ScriptedSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSurface")
            .field("deliverable", &self.deliverable)
            .field("frames", &lock(&self.frames).len())
            .field("collectors_opened", &self.collectors_opened())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Acknowledgment
// =============================================================================

/// [`Acknowledge`] hook that counts calls.
#[derive(Debug, Default)]
pub struct RecordingAck {
    calls: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingAck {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An acknowledgment the platform rejects.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// An acknowledgment that takes `delay` to complete.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Acknowledge for RecordingAck {
    async fn acknowledge(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            bail!("interaction already acknowledged");
        }
        Ok(())
    }
}
