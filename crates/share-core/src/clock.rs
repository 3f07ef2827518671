//! Poll cadence for the open-file detector.
//!
//! Sessions ask a [`PollClock`] for their trigger. Production uses
//! [`IntervalClock`]; tests drive [`ManualClock`] tick by tick.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Source of "probe now" ticks for one session.
pub enum PollTrigger {
    Interval(Interval),
    Manual(mpsc::UnboundedReceiver<()>),
}

impl PollTrigger {
    /// Wait for the next tick. A manual trigger whose clock is gone never
    /// ticks again.
    pub async fn tick(&mut self) {
        match self {
            PollTrigger::Interval(interval) => {
                interval.tick().await;
            }
            PollTrigger::Manual(rx) => {
                if rx.recv().await.is_none() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

pub trait PollClock: Send + Sync {
    /// Create the trigger for a session. Called from inside the runtime.
    fn trigger(&self, identity: &str) -> PollTrigger;
}

/// Fixed interval; the first tick fires one period after the session
/// starts watching.
pub struct IntervalClock {
    period: Duration,
}

impl IntervalClock {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl PollClock for IntervalClock {
    fn trigger(&self, _identity: &str) -> PollTrigger {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        PollTrigger::Interval(interval)
    }
}

/// Test clock: ticks only when told to.
#[derive(Default)]
pub struct ManualClock {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<()>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick the session for `identity`. Returns false if no live session
    /// is listening.
    pub fn tick(&self, identity: &str) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl PollClock for ManualClock {
    fn trigger(&self, identity: &str) -> PollTrigger {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.to_string(), tx);
        PollTrigger::Manual(rx)
    }
}
