//! Bounded-time collection of accepted signals.

use std::time::Duration;

use futures::stream::FuturesOrdered;
use futures::{FutureExt, StreamExt};
use tracing::debug;

use crate::core::Signal;
use crate::filter::SequentialFilter;
use crate::surface::Signals;

/// How long to listen and how many accepted signals to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    pub time: Duration,
    pub max: usize,
}

impl CollectOptions {
    /// Wait up to `time` for one accepted signal.
    pub fn new(time: Duration) -> Self {
        Self { time, max: 1 }
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = max.max(1);
        self
    }
}

/// Feed `events` through `filter` and return the first `options.max`
/// accepted signals, in arrival order.
///
/// Returns `None` if the time runs out first, or if the stream ends with
/// nothing left to decide. Filters latch on their first acceptance, so with
/// `max > 1` the signals after the first accepted one are taken as they
/// arrive.
pub async fn collect(
    mut events: Signals,
    filter: &SequentialFilter,
    options: CollectOptions,
) -> Option<Vec<Signal>> {
    let deadline = tokio::time::sleep(options.time);
    tokio::pin!(deadline);

    let mut verdicts = FuturesOrdered::new();
    let mut collected = Vec::with_capacity(options.max);
    let mut open = true;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!(time = ?options.time, collected = collected.len(), "collector timed out");
                return None;
            }
            next = events.next(), if open => match next {
                Some(signal) => {
                    let verdict = filter.evaluate(signal.clone());
                    verdicts.push_back(verdict.map(move |accepted| (accepted, signal)));
                }
                None => open = false,
            },
            Some((accepted, signal)) = verdicts.next(), if !verdicts.is_empty() => {
                if accepted {
                    collected.push(signal);
                    if collected.len() >= options.max {
                        return Some(collected);
                    }
                }
            }
        }

        if !open && verdicts.is_empty() {
            debug!("signal source closed before the collector finished");
            return None;
        }
    }
}
