//! The boundary between sessions and whatever actually displays them.
//!
//! A session never talks to a chat SDK directly. It builds [`View`]s and
//! hands them to a [`RenderSurface`], and it listens to [`Signals`] the
//! surface opens for it.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::{MessageRef, Signal};

/// Inbound signals from one source.
pub type Signals = BoxStream<'static, Signal>;

/// An interactive control on a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Id delivered back as the signal's `custom_id` when pressed.
    pub id: String,
    pub label: String,
    pub enabled: bool,
}

impl Control {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.enabled = !disabled;
        self
    }
}

/// Everything a surface needs to draw one state of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub title: String,
    pub body: String,
    pub footer: Option<String>,
    pub controls: Vec<Control>,
}

impl View {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    /// The same view with every control stripped, for terminal states.
    pub fn without_controls(mut self) -> Self {
        self.controls.clear();
        self
    }

    pub fn find_control(&self, id: &str) -> Option<&Control> {
        self.controls.iter().find(|control| control.id == id)
    }
}

/// Where a collector listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Presses on the controls of one delivered message.
    Components(MessageRef),
    /// Free-form messages in the session's conversation.
    Messages,
}

/// A short user-facing notice, outside the session's own view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    /// Shown only to the actor who caused it, when the platform supports it.
    pub private: bool,
}

impl Notice {
    pub fn private(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            private: true,
        }
    }

    pub fn public(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            private: false,
        }
    }
}

/// Delivers views and produces signals.
///
/// Implemented once per platform. Errors are the platform's own and travel
/// as `anyhow::Error`.
#[async_trait]
pub trait RenderSurface: Send + Sync + 'static {
    /// Whether views can currently be delivered to the conversation.
    fn can_deliver(&self) -> bool {
        true
    }

    /// Deliver a new message.
    async fn send(&self, view: View) -> anyhow::Result<MessageRef>;

    /// Replace a delivered message.
    async fn edit(&self, message: &MessageRef, view: View) -> anyhow::Result<()>;

    /// Start listening to a source. The stream ends when the surface stops
    /// delivering; dropping it stops listening.
    fn open_collector(&self, source: &Source) -> Signals;

    /// Show a notice.
    async fn notify(&self, notice: Notice) -> anyhow::Result<()>;
}
