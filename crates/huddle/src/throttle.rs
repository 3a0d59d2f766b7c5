//! Rate-limited execution with latest-arguments-win coalescing.
//!
//! A [`Throttle`] lets an async job run at most once per window:
//!
//! ```text
//! t=0     execute(a)  → runs a now
//! t=0.5   execute(b)  → scheduled for t=2.5, returns shared outcome X
//! t=1.0   execute(c)  → replaces b, returns X
//! t=2.5               → runs c, settles X with c's result
//! t=2.6   execute(d)  → scheduled for t=5.0
//! ```
//!
//! Every caller that joined a scheduled run receives the same
//! [`Outcome`]. [`Throttle::clear`] settles that outcome early with a given
//! value and resets the window, which is how a lobby stops pending
//! re-broadcasts before it edits its final view.
//!
//! At most one job runs at a time. A scheduled job whose window opens while
//! the previous job is still running waits for it, and
//! [`Throttle::settle`] waits for whatever job is running right now.
//!
//! # Example
//!
//! ```ignore
//! let refresh = Throttle::new(config.lobby_refresh);
//!
//! for event in events {
//!     let view = render(&roster);
//!     let surface = surface.clone();
//!     // Outcome is spawned already; awaiting it is optional.
//!     let _ = refresh.execute(move || async move { surface.edit(&message, view).await });
//! }
//!
//! refresh.clear(Ok(()));
//! refresh.settle().await;
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::ThrottleError;

/// Shared result of one throttled execution.
pub type Outcome<T> = Shared<BoxFuture<'static, Result<T, ThrottleError>>>;

type Job<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// The one execution waiting for its window.
struct Scheduled<T> {
    job: Job<T>,
    timer: JoinHandle<()>,
    settle: oneshot::Sender<Result<T, ThrottleError>>,
    outcome: Outcome<T>,
}

struct State<T> {
    last_run: Option<Instant>,
    scheduled: Option<Scheduled<T>>,
    /// Outcome of the job that started last.
    running: Option<Outcome<T>>,
}

impl<T: Clone> State<T> {
    fn busy(&self) -> bool {
        self.running.as_ref().is_some_and(|running| running.peek().is_none())
    }
}

/// Runs async jobs at most once per `delay`.
pub struct Throttle<T> {
    delay: Duration,
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            state: self.state.clone(),
        }
    }
}

impl<T> Throttle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(State {
                last_run: None,
                scheduled: None,
                running: None,
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `job` now if the window allows it, otherwise schedule it.
    ///
    /// While a run is scheduled, further calls replace its job and share its
    /// outcome. The job is spawned whether or not the outcome is awaited.
    pub fn execute<F, Fut>(&self, job: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let job: Job<T> = Box::new(move || job().boxed());
        let mut state = lock(&self.state);

        if let Some(scheduled) = state.scheduled.as_mut() {
            trace!("throttled job replaced");
            scheduled.job = job;
            return scheduled.outcome.clone();
        }

        let now = Instant::now();
        let remaining = state
            .last_run
            .map(|last| self.delay.saturating_sub(now.duration_since(last)))
            .unwrap_or(Duration::ZERO);

        if remaining.is_zero() && !state.busy() {
            state.last_run = Some(now);
            let outcome = spawn_now(job);
            state.running = Some(outcome.clone());
            return outcome;
        }

        let (settle, rx) = oneshot::channel();
        let outcome = rx
            .map(|received| received.unwrap_or(Err(ThrottleError::Dropped)))
            .boxed()
            .shared();
        let timer = tokio::spawn(fire(Arc::downgrade(&self.state), remaining));
        state.scheduled = Some(Scheduled {
            job,
            timer,
            settle,
            outcome: outcome.clone(),
        });
        trace!(?remaining, "throttled job scheduled");
        outcome
    }

    /// Drop any scheduled job, settle its outcome with `outcome`, and reset
    /// the window so the next call runs as soon as no job is running.
    ///
    /// A job that has already started is not interrupted; await
    /// [`settle`](Self::settle) to wait for it.
    pub fn clear(&self, outcome: Result<T, ThrottleError>) {
        let scheduled = {
            let mut state = lock(&self.state);
            state.last_run = None;
            state.scheduled.take()
        };
        if let Some(scheduled) = scheduled {
            scheduled.timer.abort();
            let _ = scheduled.settle.send(outcome);
        }
    }

    /// [`clear`](Self::clear) with [`ThrottleError::Cancelled`].
    pub fn cancel(&self) {
        self.clear(Err(ThrottleError::Cancelled));
    }

    /// Wait until no job is running.
    ///
    /// Failures of the running job are left to its callers.
    pub async fn settle(&self) {
        loop {
            let running = lock(&self.state).running.clone();
            let Some(running) = running else {
                return;
            };
            let _ = running.clone().await;
            // A scheduled job may have taken over while we waited.
            let idle = lock(&self.state)
                .running
                .as_ref()
                .map_or(true, |current| current.ptr_eq(&running));
            if idle {
                return;
            }
        }
    }

    /// Whether a job is waiting for its window.
    pub fn is_scheduled(&self) -> bool {
        lock(&self.state).scheduled.is_some()
    }
}

fn lock<T>(state: &Mutex<State<T>>) -> MutexGuard<'_, State<T>> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("throttle state lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn spawn_now<T>(job: Job<T>) -> Outcome<T>
where
    T: Clone + Send + Sync + 'static,
{
    let outcome = tokio::spawn(job())
        .map(|joined| match joined {
            Ok(result) => result.map_err(|e| ThrottleError::Failed(Arc::new(e))),
            Err(_) => Err(ThrottleError::Dropped),
        })
        .boxed()
        .shared();
    // Driven here so the outcome completes even if no caller awaits it.
    tokio::spawn(outcome.clone());
    outcome
}

/// Timer for a scheduled job. Once the window opens and the previous job is
/// done, runs whatever job is current.
async fn fire<T>(state: Weak<Mutex<State<T>>>, after: Duration)
where
    T: Clone + Send + Sync + 'static,
{
    tokio::time::sleep(after).await;

    let Some(strong) = state.upgrade() else {
        return;
    };
    let previous = lock(&strong).running.clone();
    drop(strong);
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let Some(state) = state.upgrade() else {
        return;
    };
    let scheduled = {
        let mut guard = lock(&state);
        let scheduled = guard.scheduled.take();
        if let Some(scheduled) = &scheduled {
            guard.last_run = Some(Instant::now());
            guard.running = Some(scheduled.outcome.clone());
        }
        scheduled
    };
    drop(state);

    if let Some(Scheduled {
        job, settle, outcome, ..
    }) = scheduled
    {
        trace!("throttled job running");
        let result = job().await.map_err(|e| ThrottleError::Failed(Arc::new(e)));
        let _ = settle.send(result);
        let _ = outcome.await;
    }
}

impl<T> std::fmt::Debug for Throttle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
