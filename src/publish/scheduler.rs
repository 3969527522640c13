//! Periodic publisher.
//!
//! `Idle → Waiting → Firing → Waiting …`, terminal `Stopped`. Deadlines are
//! anchored on the previous deadline (`next = last + interval`), so a skipped
//! or slow tick never shortens or resets the cadence. Interval changes apply
//! to the next arm; a pending deadline is left alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use super::format::format_rate_message;
use super::policy::PublishPolicy;
use crate::notify::Messenger;
use crate::rates::{InvalidConfigError, RateCache, RateQuote};
use crate::telemetry::{EventSink, PipelineEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Waiting,
    Firing,
    Stopped,
}

/// Mutable schedule data. Owned by one scheduler; built fresh per test.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    interval_secs: u64,
    last_published: Option<RateQuote>,
    next_fire_at: Option<Instant>,
    phase: SchedulerPhase,
    ticks: u64,
    publishes: u64,
    skipped_ticks: u64,
}

fn validate_interval(secs: i64) -> Result<u64, InvalidConfigError> {
    if secs < 1 {
        return Err(InvalidConfigError::Interval(secs));
    }
    Ok(secs as u64)
}

impl ScheduleState {
    pub fn new(interval_secs: i64) -> Result<Self, InvalidConfigError> {
        Ok(Self {
            interval_secs: validate_interval(interval_secs)?,
            last_published: None,
            next_fire_at: None,
            phase: SchedulerPhase::Idle,
            ticks: 0,
            publishes: 0,
            skipped_ticks: 0,
        })
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn last_published(&self) -> Option<&RateQuote> {
        self.last_published.as_ref()
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }
}

/// Point-in-time copy of the schedule for status surfaces.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScheduleSnapshot {
    pub phase: SchedulerPhase,
    pub policy: PublishPolicy,
    pub interval_secs: u64,
    pub last_published: Option<RateQuote>,
    pub next_fire_at: Option<chrono::DateTime<Utc>>,
    pub next_fire_in_secs: Option<u64>,
    pub ticks: u64,
    pub publishes: u64,
    pub skipped_ticks: u64,
}

/// Shared view of a scheduler's state: status reads and the admin
/// interval change go through here.
#[derive(Clone)]
pub struct ScheduleHandle {
    state: Arc<Mutex<ScheduleState>>,
    policy: PublishPolicy,
    events: Arc<dyn EventSink>,
}

impl ScheduleHandle {
    /// All-or-nothing: an invalid value leaves the interval untouched.
    pub fn set_interval(&self, secs: i64) -> Result<(), InvalidConfigError> {
        let new_secs = validate_interval(secs)?;
        let old_secs = std::mem::replace(&mut self.state.lock().interval_secs, new_secs);
        self.events.record(&PipelineEvent::IntervalChanged { old_secs, new_secs });
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.state.lock().interval_secs)
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        let st = self.state.lock();
        let next_in = st
            .next_fire_at
            .map(|t| t.saturating_duration_since(Instant::now()));
        ScheduleSnapshot {
            phase: st.phase,
            policy: self.policy,
            interval_secs: st.interval_secs,
            last_published: st.last_published.clone(),
            next_fire_at: next_in
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
            next_fire_in_secs: next_in.map(|d| d.as_secs()),
            ticks: st.ticks,
            publishes: st.publishes,
            skipped_ticks: st.skipped_ticks,
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut ScheduleState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub channel: String,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    /// Unchanged value under the on-change policy.
    Suppressed,
    /// Rate obtained but the messenger failed.
    DeliveryFailed,
    /// Every source failed; nothing published.
    Skipped,
}

pub struct PublishScheduler {
    cache: Arc<RateCache>,
    messenger: Arc<dyn Messenger>,
    target: PublishTarget,
    handle: ScheduleHandle,
    events: Arc<dyn EventSink>,
    fire_on_start: bool,
}

impl PublishScheduler {
    pub fn new(
        state: ScheduleState,
        cache: Arc<RateCache>,
        messenger: Arc<dyn Messenger>,
        target: PublishTarget,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let handle = ScheduleHandle {
            state: Arc::new(Mutex::new(state)),
            policy: PublishPolicy::default(),
            events: events.clone(),
        };
        Self {
            cache,
            messenger,
            target,
            handle,
            events,
            fire_on_start: false,
        }
    }

    pub fn with_policy(mut self, policy: PublishPolicy) -> Self {
        self.handle.policy = policy;
        self
    }

    /// Fire the first tick right away instead of after one interval.
    pub fn fire_on_start(mut self, yes: bool) -> Self {
        self.fire_on_start = yes;
        self
    }

    pub fn handle(&self) -> ScheduleHandle {
        self.handle.clone()
    }

    /// One firing step. Never fails: every outcome is reported and the
    /// caller goes back to waiting.
    pub async fn tick(&self) -> TickOutcome {
        self.handle.update(|s| {
            s.phase = SchedulerPhase::Firing;
            s.ticks += 1;
        });

        let quote = match self.cache.get_rate().await {
            Ok(q) => q,
            Err(e) => {
                self.events.record(&PipelineEvent::TickSkipped {
                    error: e.to_string(),
                });
                self.handle.update(|s| s.skipped_ticks += 1);
                return TickOutcome::Skipped;
            }
        };

        let last = self.handle.update(|s| s.last_published.clone());
        if !self.handle.policy.should_publish(last.as_ref(), &quote) {
            self.events.record(&PipelineEvent::PublishSuppressed {
                value: quote.value(),
            });
            return TickOutcome::Suppressed;
        }

        let text = format_rate_message(&quote, &Local::now());
        match self
            .messenger
            .send_message(&self.target.channel, self.target.topic.as_deref(), &text)
            .await
        {
            Ok(()) => {
                self.events.record(&PipelineEvent::PublishSucceeded {
                    source: quote.source().to_string(),
                    value: quote.value(),
                });
                self.handle.update(|s| {
                    s.last_published = Some(quote);
                    s.publishes += 1;
                });
                TickOutcome::Published
            }
            Err(e) => {
                self.events.record(&PipelineEvent::PublishFailed {
                    error: format!("{e:#}"),
                });
                TickOutcome::DeliveryFailed
            }
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Shutdown is observed while waiting and between ticks; a tick that has
    /// started always runs to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let first = if self.fire_on_start {
            Duration::ZERO
        } else {
            self.handle.interval()
        };
        let mut deadline = Instant::now() + first;
        tracing::info!(
            target: "publish",
            interval_secs = self.handle.interval().as_secs(),
            policy = self.handle.policy.as_str(),
            channel = %self.target.channel,
            "publish scheduler started"
        );

        loop {
            self.handle.update(|s| {
                s.phase = SchedulerPhase::Waiting;
                s.next_fire_at = Some(deadline);
            });
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep_until(deadline) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let outcome = self.tick().await;
            tracing::debug!(target: "publish", ?outcome, "tick done");

            let interval = self.handle.interval();
            let now = Instant::now();
            deadline += interval;
            if deadline <= now {
                // Fell behind by a whole interval (host suspend); re-anchor.
                deadline = now + interval;
            }
        }

        self.handle.update(|s| {
            s.phase = SchedulerPhase::Stopped;
            s.next_fire_at = None;
        });
        tracing::info!(target: "publish", "publish scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_rejects_non_positive_interval() {
        assert_eq!(
            ScheduleState::new(0).unwrap_err(),
            InvalidConfigError::Interval(0)
        );
        assert!(ScheduleState::new(-5).is_err());
        let st = ScheduleState::new(600).unwrap();
        assert_eq!(st.interval_secs(), 600);
        assert_eq!(st.phase(), SchedulerPhase::Idle);
        assert!(st.last_published().is_none());
    }
}
