//! Request/reply between processes, built on the correlation registry.
//!
//! Each outbound call is a token: the id travels in the [`Envelope`], the
//! continuation stays in the registry. The reply consumes the token and
//! settles the caller; silence lets the token expire and the caller gets
//! [`ChannelError::Timeout`].
//!
//! ```text
//!   caller                        this side                        peer
//!     │ send("record", args)          │                              │
//!     │──────────────────────────────►│ issue(continuation, 30s)     │
//!     │                               │── {id, kind: call} ─────────►│
//!     │                               │                              │ operation runs
//!     │                               │◄──── {id, kind: result} ─────│
//!     │◄──────────── value ───────────│ consume(id).resolve(value)   │
//! ```
//!
//! Both sides are symmetric: every channel can call and be called. Inbound
//! calls are dispatched to the named [`Operations`] handler and always get
//! exactly one reply with the same id.
//!
//! # Example
//!
//! ```ignore
//! let operations = Operations::new()
//!     .register("record", |args| async move {
//!         ledger.append(args).await?;
//!         Ok(Value::Null)
//!     });
//!
//! let channel = Arc::new(
//!     ProcessChannel::new(Arc::new(transport))
//!         .with_operations(operations)
//!         .with_call_timeout(config.call_timeout),
//! );
//! tokio::spawn(channel.clone().listen(frames));
//!
//! let total: u64 = channel.call("total", vec![json!("alice")]).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::TokenId;
use crate::envelope::{Body, Envelope, RemoteError};
use crate::error::ChannelError;
use crate::registry::{Continuation, CorrelationRegistry};
use crate::transport::{Frames, Transport};

type Operation = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Name of the error returned for calls to an unregistered operation.
pub const UNKNOWN_OPERATION: &str = "UnknownOperation";

// =============================================================================
// Operations
// =============================================================================

/// Named operations the other side may call.
#[derive(Clone, Default)]
pub struct Operations {
    handlers: HashMap<String, Operation>,
}

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. A later registration under the same name
    /// replaces the earlier one.
    pub fn register<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |args| handler(args).boxed()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        let Some(handler) = self.handlers.get(name).cloned() else {
            return Err(RemoteError::new(
                UNKNOWN_OPERATION,
                format!("no operation named `{name}`"),
            ));
        };
        handler(args)
            .await
            .map_err(|e| RemoteError::from_anyhow(&e))
    }
}

impl std::fmt::Debug for Operations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

// =============================================================================
// Channel
// =============================================================================

/// One end of a request/reply channel.
pub struct ProcessChannel {
    registry: CorrelationRegistry<Continuation<Value, ChannelError>>,
    transport: Arc<dyn Transport>,
    operations: Operations,
    call_timeout: Duration,
}

impl ProcessChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            registry: CorrelationRegistry::new(),
            transport,
            operations: Operations::new(),
            call_timeout: Config::default().call_timeout,
        }
    }

    /// Create a channel using the configured call timeout.
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self::new(transport).with_call_timeout(config.call_timeout)
    }

    pub fn with_operations(mut self, operations: Operations) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Call a remote operation and wait for its raw reply.
    ///
    /// Fails with [`ChannelError::Timeout`] when no reply arrives within the
    /// call timeout, and with [`ChannelError::Remote`] when the operation
    /// failed on the other side.
    pub async fn send(&self, operation: &str, args: Vec<Value>) -> Result<Value, ChannelError> {
        let (reply, rx) = Continuation::new();
        let id = self.registry.issue(reply, self.call_timeout);
        debug!(token = %id, operation, "calling remote operation");

        let transmitted = match Envelope::call(id.clone(), operation, args).encode() {
            Ok(frame) => self.transport.send(frame).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = transmitted {
            // Nothing will ever answer this id.
            self.registry.consume(&id);
            warn!(token = %id, operation, error = %e, "failed to transmit call");
            return Err(e);
        }

        rx.await.unwrap_or(Err(ChannelError::Closed))
    }

    /// Call a remote operation and decode its reply.
    pub async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<T, ChannelError> {
        let value = self.send(operation, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Handle one inbound frame.
    ///
    /// Replies settle their pending call. Calls run the named operation and
    /// are answered with the same id. A call whose id is readable but whose
    /// body is not is answered with a `TypeError`. Other undecodable frames
    /// and replies to unknown ids are logged and dropped.
    pub async fn receive(&self, raw: &str) {
        let Envelope { id, body } = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                match Envelope::call_id(raw) {
                    Some(id) => {
                        warn!(token = %id, error = %e, "rejecting malformed call");
                        let error = RemoteError::new("TypeError", format!("malformed call: {e}"));
                        self.reply(Envelope::error(id, error)).await;
                    }
                    None => warn!(error = %e, "dropping malformed frame"),
                }
                return;
            }
        };

        match body {
            Body::Result { result } => self.settle(&id, Ok(result)),
            Body::Error { error } => self.settle(&id, Err(ChannelError::Remote(error))),
            Body::Call { operation, args } => self.answer(id, &operation, args).await,
        }
    }

    /// Pump an inbound frame stream into [`receive`](Self::receive) until it
    /// ends. Each frame is handled on its own task so a slow operation does
    /// not hold up replies behind it.
    pub async fn listen(self: Arc<Self>, mut frames: Frames) {
        while let Some(frame) = frames.next().await {
            let channel = self.clone();
            tokio::spawn(async move { channel.receive(&frame).await });
        }
        debug!(pending = self.pending(), "frame stream ended");
    }

    /// Number of calls still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    fn settle(&self, id: &TokenId, outcome: Result<Value, ChannelError>) {
        match self.registry.consume(id) {
            Some(reply) => {
                if !reply.settle(outcome) {
                    debug!(token = %id, "caller gave up before the reply arrived");
                }
            }
            None => warn!(token = %id, "reply for unknown or expired call"),
        }
    }

    async fn answer(&self, id: TokenId, operation: &str, args: Vec<Value>) {
        let reply = match self.operations.invoke(operation, args).await {
            Ok(value) => Envelope::result(id.clone(), value),
            Err(error) => {
                debug!(token = %id, operation, error = %error, "operation failed");
                Envelope::error(id, error)
            }
        };
        self.reply(reply).await;
    }

    async fn reply(&self, reply: Envelope) {
        let id = reply.id.clone();
        let frame = match reply.encode() {
            Ok(frame) => frame,
            Err(e) => {
                let fallback = Envelope::error(id.clone(), RemoteError::new("Error", e.to_string()));
                match fallback.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(token = %id, error = %e, "could not encode reply");
                        return;
                    }
                }
            }
        };

        if let Err(e) = self.transport.send(frame).await {
            warn!(token = %id, error = %e, "failed to transmit reply");
        }
    }
}

impl std::fmt::Debug for ProcessChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessChannel")
            .field("operations", &self.operations)
            .field("pending", &self.pending())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_pair;
    use serde_json::json;

    fn connected(operations: Operations) -> (Arc<ProcessChannel>, Arc<ProcessChannel>) {
        let ((left_tx, left_rx), (right_tx, right_rx)) = memory_pair();
        let caller = Arc::new(ProcessChannel::new(Arc::new(left_tx)));
        let callee = Arc::new(ProcessChannel::new(Arc::new(right_tx)).with_operations(operations));
        tokio::spawn(caller.clone().listen(left_rx));
        tokio::spawn(callee.clone().listen(right_rx));
        (caller, callee)
    }

    #[tokio::test]
    async fn test_call_returns_remote_result() {
        let ops = Operations::new().register("add", |args| async move {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok::<_, anyhow::Error>(json!(sum))
        });
        let (caller, _callee) = connected(ops);

        let sum: i64 = caller.call("add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(sum, 5);
        assert_eq!(caller.pending(), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_name_and_message() {
        let ops = Operations::new().register("explode", |_| async move {
            Err::<Value, _>(anyhow::Error::new(RemoteError::new("RangeError", "boom")))
        });
        let (caller, _callee) = connected(ops);

        match caller.send("explode", vec![]).await {
            Err(ChannelError::Remote(error)) => {
                assert_eq!(error.name, "RangeError");
                assert_eq!(error.message, "boom");
            }
            other => panic!("Expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_operation_is_answered() {
        let (caller, _callee) = connected(Operations::new());

        match caller.send("missing", vec![]).await {
            Err(ChannelError::Remote(error)) => assert_eq!(error.name, UNKNOWN_OPERATION),
            other => panic!("Expected Remote, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out() {
        // The peer end exists but nobody listens on it.
        let ((tx, _rx), (_peer_tx, _peer_rx)) = memory_pair();
        let channel = ProcessChannel::new(Arc::new(tx)).with_call_timeout(Duration::from_millis(50));

        match channel.send("anything", vec![]).await {
            Err(ChannelError::Timeout { duration }) => {
                assert_eq!(duration, Duration::from_millis(50))
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_releases_token() {
        let ((tx, _rx), (_peer_tx, peer_rx)) = memory_pair();
        drop(peer_rx);
        let channel = ProcessChannel::new(Arc::new(tx));

        let err = channel.send("anything", vec![]).await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_stray_and_malformed_frames_are_dropped() {
        let ((tx, _rx), (_peer_tx, _peer_rx)) = memory_pair();
        let channel = ProcessChannel::new(Arc::new(tx));

        channel.receive(r#"{"id":"nope","kind":"result","result":1}"#).await;
        channel.receive("not json").await;
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_malformed_call_is_still_answered() {
        let ((tx, _rx), (_peer_tx, mut peer_rx)) = memory_pair();
        let channel = ProcessChannel::new(Arc::new(tx));

        channel.receive(r#"{"id":"41","kind":"call","fn":7}"#).await;

        let frame = peer_rx.next().await.unwrap();
        let reply = Envelope::decode(&frame).unwrap();
        assert_eq!(reply.id.as_str(), "41");
        match reply.body {
            Body::Error { error } => {
                assert_eq!(error.name, "TypeError");
                assert!(error.message.starts_with("malformed call"));
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_both_sides_can_call() {
        let ((left_tx, left_rx), (right_tx, right_rx)) = memory_pair();
        let left = Arc::new(
            ProcessChannel::new(Arc::new(left_tx))
                .with_operations(Operations::new().register("side", |_| async { Ok::<_, anyhow::Error>(json!("left")) })),
        );
        let right = Arc::new(
            ProcessChannel::new(Arc::new(right_tx))
                .with_operations(Operations::new().register("side", |_| async { Ok::<_, anyhow::Error>(json!("right")) })),
        );
        tokio::spawn(left.clone().listen(left_rx));
        tokio::spawn(right.clone().listen(right_rx));

        let from_right: String = left.call("side", vec![]).await.unwrap();
        let from_left: String = right.call("side", vec![]).await.unwrap();
        assert_eq!(from_right, "right");
        assert_eq!(from_left, "left");
    }
}
