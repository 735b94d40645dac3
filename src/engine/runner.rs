use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::engine::fsm::ScheduledTransition;
use crate::engine::registry::EngineHandle;
use crate::error::Result;
use crate::util::Shutdown;

/// Drives an engine on a wall-clock interval, replaying scripted transitions as their tick comes
/// up.
#[derive(Debug)]
pub struct Runner {
    handle: EngineHandle,
    interval: Duration,
    events: Vec<ScheduledTransition>,
    limit: Option<u64>,
}

impl Runner {
    pub fn new(handle: EngineHandle, interval: Duration) -> Self {
        Runner {
            handle,
            interval,
            events: Vec::new(),
            limit: None,
        }
    }

    pub fn with_events(mut self, events: Vec<ScheduledTransition>) -> Self {
        self.events = events;
        self
    }

    /// Stop after `ticks` ticks instead of running until shutdown.
    pub fn with_limit(mut self, ticks: u64) -> Self {
        self.limit = Some(ticks);
        self
    }

    /// Runs until shutdown or the tick limit. Returns the number of ticks taken.
    ///
    /// A scheduled transition with `at_tick = n` is applied just before the n-th tick; rejected
    /// transitions are logged and skipped.
    #[tracing::instrument(skip_all, fields(component = %self.handle.id()))]
    pub async fn run(self, mut shutdown: Shutdown) -> Result<u64> {
        let mut events = self.events;
        events.sort_by_key(|e| e.at_tick);
        let mut events = VecDeque::from(events);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0;
        while self.limit.map_or(true, |limit| ticks < limit) {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!(ticks, "shutting down");
                    break;
                }
                _ = interval.tick() => {
                    while events.front().map_or(false, |e| e.at_tick <= ticks + 1) {
                        let Some(event) = events.pop_front() else { break };
                        tracing::debug!(at_tick = event.at_tick, transition = ?event.transition, "applying scheduled transition");
                        if let Err(err) = self.handle.transition(event.transition) {
                            tracing::warn!(%err, "scheduled transition rejected");
                        }
                    }
                    self.handle.tick(self.interval)?;
                    ticks += 1;
                }
            }
        }
        Ok(ticks)
    }
}
