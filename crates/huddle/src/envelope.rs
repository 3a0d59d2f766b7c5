//! Wire format for [`ProcessChannel`](crate::ProcessChannel).
//!
//! One JSON object per frame:
//!
//! ```text
//! {"id":"7","kind":"call","fn":"record","args":[...]}
//! {"id":"7","kind":"result","result":...}
//! {"id":"7","kind":"error","error":{"__type":"Error","name":"RangeError","message":"boom","stack":null,"cause":null}}
//! ```
//!
//! Errors are plain data on the wire. The `__type` marker is what tells a
//! serialized error apart from an ordinary object, so a failure on one side
//! comes back as a [`RemoteError`] with its name, message, stack and cause
//! chain intact.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::TokenId;

/// One frame on a process channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: TokenId,
    #[serde(flatten)]
    pub body: Body,
}

/// What a frame carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Body {
    /// Run a named operation on the other side.
    Call {
        #[serde(rename = "fn")]
        operation: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// The operation succeeded.
    Result {
        #[serde(default)]
        result: Value,
    },
    /// The operation failed.
    Error { error: RemoteError },
}

impl Envelope {
    pub fn call(id: TokenId, operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            body: Body::Call {
                operation: operation.into(),
                args,
            },
        }
    }

    pub fn result(id: TokenId, result: Value) -> Self {
        Self {
            id,
            body: Body::Result { result },
        }
    }

    pub fn error(id: TokenId, error: RemoteError) -> Self {
        Self {
            id,
            body: Body::Error { error },
        }
    }

    /// Serialize to a single-line JSON frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a frame.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The id of a frame that claims to be a call, even if the rest of it
    /// does not decode.
    pub fn call_id(raw: &str) -> Option<TokenId> {
        let frame: Value = serde_json::from_str(raw).ok()?;
        if frame.get("kind")?.as_str()? != "call" {
            return None;
        }
        serde_json::from_value(frame.get("id")?.clone()).ok()
    }
}

// =============================================================================
// Remote Error
// =============================================================================

/// Marker distinguishing a serialized error from plain data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum ErrorMarker {
    #[default]
    Error,
}

/// An error reconstructed from the other side of a process channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "__type")]
    marker: ErrorMarker,
    /// Error class name (`"Error"`, `"RangeError"`, `"UnknownOperation"`).
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub cause: Option<Box<RemoteError>>,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            marker: ErrorMarker::Error,
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_cause(mut self, cause: RemoteError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Flatten a local failure into wire form.
    ///
    /// A `RemoteError` returned by an operation keeps its own name. Anything
    /// else is named `Error`, and its `source()` chain becomes the cause
    /// chain.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        if let Some(remote) = error.downcast_ref::<RemoteError>() {
            return remote.clone();
        }

        let mut chain: Vec<String> = error.chain().map(|e| e.to_string()).collect();
        let mut built = RemoteError::new("Error", chain.pop().unwrap_or_default());
        while let Some(message) = chain.pop() {
            built = RemoteError::new("Error", message).with_cause(built);
        }
        built
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
