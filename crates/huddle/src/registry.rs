//! Correlation registry - TTL-bound tokens that resume work later by id.
//!
//! A token binds an opaque id to exactly one resumption path: a pending reply
//! waiting on another process, or a handler ticket for a UI control that will
//! be pressed minutes from now.
//!
//! # Lifecycle
//!
//! ```text
//! issue(data, ttl) ──► live ──┬─► consume(id)  → data returned, timer cancelled
//!                             │
//!                             └─► ttl elapses  → data.expire(..) fires once
//! ```
//!
//! Both exits remove the entry with a single `DashMap::remove`, so whichever
//! happens first wins and the other becomes a no-op. An entry never fires
//! twice and no timer outlives its entry.
//!
//! # Example
//!
//! ```ignore
//! let registry: CorrelationRegistry<Continuation<Value, ChannelError>> =
//!     CorrelationRegistry::new();
//!
//! let (reply, rx) = Continuation::new();
//! let id = registry.issue(reply, Duration::from_secs(30));
//!
//! // later, when the answer arrives
//! if let Some(reply) = registry.consume(&id) {
//!     reply.resolve(answer);
//! }
//!
//! // or, if nothing arrives in time
//! assert!(matches!(rx.await?, Err(ChannelError::Timeout { .. })));
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::{Signal, TokenId};
use crate::error::RegistryError;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(600);

// =============================================================================
// Expiry
// =============================================================================

/// Details handed to an entry that expired unconsumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub id: TokenId,
    pub ttl: Duration,
}

/// What an entry does when its token expires unconsumed.
///
/// This is the "reject" half of a continuation. Entries without one (plain
/// handler tickets) simply disappear.
pub trait Expire: Send + Sync + 'static {
    fn expire(self, expired: Expired);
}

impl Expire for () {
    fn expire(self, _expired: Expired) {}
}

/// A resolve/reject pair waiting on a correlated answer.
///
/// Expiry rejects it with `E::from(Expired)`, which for the built-in error
/// types is a timeout.
pub struct Continuation<R, E> {
    tx: oneshot::Sender<Result<R, E>>,
}

impl<R, E> Continuation<R, E> {
    /// Create a continuation and the receiver that observes its settlement.
    pub fn new() -> (Self, oneshot::Receiver<Result<R, E>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Resolve with a value. Returns `false` if nobody is listening anymore.
    pub fn resolve(self, value: R) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with an error. Returns `false` if nobody is listening anymore.
    pub fn reject(self, error: E) -> bool {
        self.settle(Err(error))
    }

    /// Settle with a ready-made outcome.
    pub fn settle(self, outcome: Result<R, E>) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

impl<R, E> Expire for Continuation<R, E>
where
    R: Send + 'static,
    E: From<Expired> + Send + 'static,
{
    fn expire(self, expired: Expired) {
        self.reject(E::from(expired));
    }
}

// =============================================================================
// Token Keys
// =============================================================================

/// Anything that can name a token: a raw id, or a carrier with an id-bearing
/// field (a control press carries it as its `custom_id`).
pub trait TokenKey {
    fn token_key(&self) -> Option<&str>;
}

impl TokenKey for str {
    fn token_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl TokenKey for String {
    fn token_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl TokenKey for TokenId {
    fn token_key(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl TokenKey for Signal {
    fn token_key(&self) -> Option<&str> {
        self.custom_id()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry-owned bookkeeping for one live token.
struct Entry<T> {
    data: T,
    expires_at: Instant,
    timer: JoinHandle<()>,
}

struct Inner<T> {
    entries: DashMap<TokenId, Entry<T>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.timer.abort();
        }
    }
}

/// Issues and consumes TTL-bound correlation tokens.
///
/// Cloning is cheap and yields a handle to the same registry. Issuing needs a
/// running tokio runtime, since each token schedules its own expiry.
pub struct CorrelationRegistry<T> {
    inner: Arc<Inner<T>>,
    default_ttl: Duration,
}

impl<T> Clone for CorrelationRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<T: Expire> Default for CorrelationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Expire> CorrelationRegistry<T> {
    /// Create an empty registry with the default TTL.
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_TOKEN_TTL)
    }

    /// Create an empty registry whose [`issue_default`](Self::issue_default)
    /// uses the given TTL.
    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
            }),
            default_ttl,
        }
    }

    /// Store `data` under a fresh id that expires after `ttl`.
    pub fn issue(&self, data: T, ttl: Duration) -> TokenId {
        // Fresh ids never collide with each other, only with a caller-supplied
        // id that happens to look numeric. Skip those.
        let slot = loop {
            if let MapEntry::Vacant(slot) = self.inner.entries.entry(TokenId::next()) {
                break slot;
            }
        };
        let id = slot.key().clone();
        slot.insert(self.schedule(id.clone(), data, ttl));
        debug!(token = %id, ?ttl, "token issued");
        id
    }

    /// Store `data` under a fresh id with the registry's default TTL.
    pub fn issue_default(&self, data: T) -> TokenId {
        self.issue(data, self.default_ttl)
    }

    /// Store `data` under a caller-chosen id.
    ///
    /// Fails if the id is already live: an id resumes at most one path.
    pub fn issue_with_id(
        &self,
        id: impl Into<TokenId>,
        data: T,
        ttl: Duration,
    ) -> Result<TokenId, RegistryError> {
        let id = id.into();
        match self.inner.entries.entry(id.clone()) {
            MapEntry::Occupied(_) => Err(RegistryError::DuplicateToken(id)),
            MapEntry::Vacant(slot) => {
                // The shard stays locked until the insert, so an instant
                // expiry cannot run before the entry exists.
                slot.insert(self.schedule(id.clone(), data, ttl));
                debug!(token = %id, ?ttl, "token issued");
                Ok(id)
            }
        }
    }

    /// Remove a live token and return its data, cancelling its expiry.
    ///
    /// Accepts a raw id or any [`TokenKey`] carrier such as a [`Signal`].
    /// Returns `None` if the token is unknown, consumed or expired.
    pub fn consume<K: TokenKey + ?Sized>(&self, key: &K) -> Option<T> {
        let key = key.token_key()?;
        let (id, entry) = self.inner.entries.remove(key)?;
        entry.timer.abort();
        trace!(token = %id, "token consumed");
        Some(entry.data)
    }

    /// Whether a token is currently live.
    pub fn contains<K: TokenKey + ?Sized>(&self, key: &K) -> bool {
        key.token_key()
            .is_some_and(|key| self.inner.entries.contains_key(key))
    }

    /// Time left before a live token expires.
    pub fn remaining<K: TokenKey + ?Sized>(&self, key: &K) -> Option<Duration> {
        let entry = self.inner.entries.get(key.token_key()?)?;
        Some(entry.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no tokens are live.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn schedule(&self, id: TokenId, data: T, ttl: Duration) -> Entry<T> {
        let expires_at = Instant::now() + ttl;
        let timer = tokio::spawn(expire_at(Arc::downgrade(&self.inner), id, ttl, expires_at));
        Entry {
            data,
            expires_at,
            timer,
        }
    }
}

/// Expiry task for one token.
///
/// Holds only a weak reference so a dropped registry does not stay alive
/// waiting for its timers.
async fn expire_at<T: Expire>(inner: Weak<Inner<T>>, id: TokenId, ttl: Duration, at: Instant) {
    tokio::time::sleep_until(at).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };

    // Single remove-and-check: if `consume` got here first there is nothing
    // left to fire.
    let removed = inner.entries.remove(&id);
    drop(inner);

    if let Some((id, entry)) = removed {
        debug!(token = %id, ?ttl, "token expired");
        entry.data.expire(Expired { id, ttl });
    }
}

impl<T> std::fmt::Debug for CorrelationRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("live", &self.inner.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
