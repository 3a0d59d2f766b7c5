//! In-order evaluation of an async predicate over concurrent signals.
//!
//! Signals can arrive faster than the predicate decides on them, and the
//! predicate usually mutates session state (a lobby adding a participant, a
//! turn applying a move). [`SequentialFilter`] makes those decisions happen
//! one at a time, in arrival order:
//!
//! ```text
//! signal 1 ──► ack ──► predicate(1) ──► false
//! signal 2 ──► ack ───────────────────► predicate(2) ──► true  (latched)
//! signal 3 ──► ack ─────────────────────────────────────► true  (skipped)
//! ```
//!
//! - Acknowledgment starts the moment a signal arrives, not when its turn
//!   comes, so slow predicates never push a signal past the platform's
//!   acknowledgment deadline.
//! - A failed or late acknowledgment makes that evaluation `false` without
//!   calling the predicate.
//! - The first `true` latches: every later evaluation, queued or new, is
//!   `true` without calling the predicate. Build a new filter to start over.
//! - A predicate error is logged and counts as `false`.
//!
//! Because only one predicate call is ever running, predicates can lock
//! shared session state without contending with themselves.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::Signal;

/// Pending decision for one signal. `true` means "stop collecting".
pub type Verdict = Shared<BoxFuture<'static, bool>>;

type Predicate = Box<dyn FnMut(Signal) -> BoxFuture<'static, anyhow::Result<bool>> + Send>;

struct Inner {
    predicate: Mutex<Predicate>,
    /// Verdict of the most recently submitted signal.
    tail: Mutex<Verdict>,
    latched: AtomicBool,
}

/// Serializes an async predicate across concurrently arriving signals.
#[derive(Clone)]
pub struct SequentialFilter {
    inner: Arc<Inner>,
    ack_deadline: Duration,
}

impl SequentialFilter {
    pub fn new<F, Fut>(mut predicate: F) -> Self
    where
        F: FnMut(Signal) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                predicate: Mutex::new(Box::new(move |signal| predicate(signal).boxed())),
                tail: Mutex::new(futures::future::ready(false).boxed().shared()),
                latched: AtomicBool::new(false),
            }),
            ack_deadline: Config::default().ack_deadline,
        }
    }

    /// A filter that accepts every signal.
    pub fn accept_all() -> Self {
        Self::new(|_| async { Ok::<_, anyhow::Error>(true) })
    }

    pub fn with_ack_deadline(mut self, ack_deadline: Duration) -> Self {
        self.ack_deadline = ack_deadline;
        self
    }

    /// Whether some signal has already been accepted.
    pub fn is_latched(&self) -> bool {
        self.inner.latched.load(Ordering::SeqCst)
    }

    /// Submit a signal. Its verdict settles only after every earlier
    /// signal's verdict has.
    pub fn evaluate(&self, signal: Signal) -> Verdict {
        let ack = signal.acknowledger().map(|ack| {
            let deadline = self.ack_deadline;
            tokio::spawn(async move {
                match tokio::time::timeout(deadline, ack.acknowledge()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(error = %e, "acknowledgment failed");
                        false
                    }
                    Err(_) => {
                        debug!(?deadline, "acknowledgment missed its deadline");
                        false
                    }
                }
            })
        });

        let inner = self.inner.clone();
        let mut tail = self
            .inner
            .tail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = tail.clone();

        let verdict = async move {
            previous.await;
            if inner.latched.load(Ordering::SeqCst) {
                return true;
            }
            if let Some(ack) = ack {
                if !ack.await.unwrap_or(false) {
                    return false;
                }
            }

            let actor = signal.actor.id.clone();
            let judged = {
                let mut predicate = inner.predicate.lock().unwrap_or_else(|poisoned| {
                    warn!("filter predicate lock was poisoned, recovering");
                    poisoned.into_inner()
                });
                (predicate)(signal)
            };
            let stop = match judged.await {
                Ok(stop) => stop,
                Err(e) => {
                    warn!(actor = %actor, error = %e, "filter predicate failed");
                    false
                }
            };
            if stop {
                inner.latched.store(true, Ordering::SeqCst);
            }
            stop
        }
        .boxed()
        .shared();

        *tail = verdict.clone();
        verdict
    }
}

impl std::fmt::Debug for SequentialFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialFilter")
            .field("latched", &self.is_latched())
            .field("ack_deadline", &self.ack_deadline)
            .finish()
    }
}
