// src/rates/aggregator.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::rates::error::{AllSourcesFailed, SourceError, SourceFailure};
use crate::rates::types::{QuoteProvider, RateQuote, RateSource};
use crate::telemetry::{EventSink, PipelineEvent};

/// Queries sources in priority order and returns the first good quote.
///
/// Sources are tried one after another, never concurrently, each bounded by
/// `per_source_timeout`. No source is retried within one `fetch()`.
pub struct RateAggregator {
    sources: Vec<Arc<dyn RateSource>>,
    per_source_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl RateAggregator {
    pub fn new(
        sources: Vec<Arc<dyn RateSource>>,
        per_source_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            sources,
            per_source_timeout,
            events,
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn fetch(&self) -> Result<RateQuote, AllSourcesFailed> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for src in &self.sources {
            let name = src.name().to_string();
            self.events.record(&PipelineEvent::FetchAttempt {
                source: name.clone(),
            });

            let started = Instant::now();
            let outcome = match tokio::time::timeout(self.per_source_timeout, src.fetch_quote()).await
            {
                Ok(res) => res,
                Err(_) => Err(SourceError::fetch(format!(
                    "timed out after {}s",
                    self.per_source_timeout.as_secs_f64()
                ))),
            };

            let elapsed = started.elapsed();

            match outcome {
                Ok(quote) => {
                    self.events.record(&PipelineEvent::FetchSucceeded {
                        source: name,
                        value: quote.value(),
                        elapsed,
                    });
                    return Ok(quote);
                }
                Err(error) => {
                    self.events.record(&PipelineEvent::FetchFailed {
                        source: name.clone(),
                        error: error.clone(),
                        elapsed,
                    });
                    failures.push(SourceFailure {
                        source: name,
                        error,
                    });
                }
            }
        }

        Err(AllSourcesFailed { failures })
    }
}

#[async_trait]
impl QuoteProvider for RateAggregator {
    async fn fetch(&self) -> Result<RateQuote, AllSourcesFailed> {
        RateAggregator::fetch(self).await
    }
}
