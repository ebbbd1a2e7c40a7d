//! The LambdaBA ticker.
//!
//! A single process-wide interval whose ticks the orchestrator fans out to
//! per-chain channels; agreement instances never own a clock of their own.

use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

pub(crate) struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub(crate) fn new(lambda: Duration) -> Self {
        let mut interval = interval(lambda);
        // A stalled consumer should not be replayed a burst of old ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub(crate) async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
