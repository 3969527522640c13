//! Time-bounded cache in front of the aggregator.
//!
//! The entry lives behind an async mutex that is held for the whole
//! check-then-refresh sequence, so at most one refresh is in flight.
//! Callers that queued behind a refresh get its outcome: the quote it
//! stored, or the failure it produced. A failure is never served to a
//! caller that arrived after it completed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::rates::error::AllSourcesFailed;
use crate::rates::types::{QuoteProvider, RateQuote};
use crate::telemetry::{EventSink, PipelineEvent};

#[derive(Debug, Clone)]
struct CacheEntry {
    quote: RateQuote,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Slot {
    entry: Option<CacheEntry>,
    /// Failure of the most recent refresh, tagged with its generation.
    last_failure: Option<(u64, AllSourcesFailed)>,
}

pub struct RateCache {
    provider: Arc<dyn QuoteProvider>,
    ttl: Duration,
    slot: Mutex<Slot>,
    /// Completed refreshes. Bumped under the slot lock.
    generation: AtomicU64,
    events: Arc<dyn EventSink>,
}

impl RateCache {
    pub fn new(provider: Arc<dyn QuoteProvider>, ttl: Duration, events: Arc<dyn EventSink>) -> Self {
        Self {
            provider,
            ttl,
            slot: Mutex::new(Slot::default()),
            generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached quote, or a new one from the provider.
    ///
    /// A failed refresh propagates to its caller and to every caller that
    /// was queued behind it; an expired entry is never handed out.
    pub async fn get_rate(&self) -> Result<RateQuote, AllSourcesFailed> {
        let seen = self.generation.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.entry.as_ref().filter(|e| e.is_fresh(Instant::now())) {
            self.events.record(&PipelineEvent::CacheHit);
            return Ok(entry.quote.clone());
        }
        if let Some((generation, err)) = &slot.last_failure {
            if *generation > seen {
                return Err(err.clone());
            }
        }

        self.events.record(&PipelineEvent::CacheMiss);
        let outcome = self.provider.fetch().await;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        match outcome {
            Ok(quote) => {
                slot.entry = Some(CacheEntry {
                    quote: quote.clone(),
                    expires_at: Instant::now() + self.ttl,
                });
                slot.last_failure = None;
                Ok(quote)
            }
            Err(err) => {
                slot.last_failure = Some((generation, err.clone()));
                Err(err)
            }
        }
    }

    /// The cached quote if still fresh. Never contacts sources; waits if a
    /// refresh is in flight.
    pub async fn peek(&self) -> Option<RateQuote> {
        let slot = self.slot.lock().await;
        slot.entry
            .as_ref()
            .filter(|e| e.is_fresh(Instant::now()))
            .map(|e| e.quote.clone())
    }

    pub async fn invalidate(&self) {
        self.slot.lock().await.entry = None;
    }
}
