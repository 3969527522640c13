//! Observability collaborator.
//!
//! The pipeline reports discrete facts as [`PipelineEvent`]s through an
//! [`EventSink`]; [`Telemetry`] turns them into `tracing` events, Prometheus
//! series (via the `metrics` facade) and in-memory usage statistics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::rates::error::SourceError;
use crate::stats::UsageStats;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    FetchAttempt { source: String },
    FetchSucceeded { source: String, value: Decimal, elapsed: Duration },
    FetchFailed { source: String, error: SourceError, elapsed: Duration },
    CacheHit,
    CacheMiss,
    PublishSucceeded { source: String, value: Decimal },
    PublishSuppressed { value: Decimal },
    PublishFailed { error: String },
    TickSkipped { error: String },
    IntervalChanged { old_secs: u64, new_secs: u64 },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &PipelineEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: &PipelineEvent) {}
}

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("rate_fetch_attempts_total", "Source fetch attempts.");
        describe_counter!(
            "rate_fetch_failures_total",
            "Source fetch/parse failures by kind."
        );
        describe_counter!("rate_cache_hits_total", "Rate cache hits.");
        describe_counter!("rate_cache_misses_total", "Rate cache misses (refreshes).");
        describe_counter!("rate_publish_total", "Rates published to the channel.");
        describe_counter!(
            "rate_publish_failures_total",
            "Channel deliveries that failed."
        );
        describe_counter!(
            "rate_ticks_skipped_total",
            "Scheduler ticks skipped because every source failed."
        );
        describe_counter!("bot_commands_total", "Chat commands handled.");
        describe_histogram!(
            "rate_fetch_duration_seconds",
            "Time spent on one source attempt, timeouts included."
        );
        describe_gauge!("rate_last_value", "Last successfully fetched rate.");
        describe_gauge!("rate_publish_interval_secs", "Current publish interval.");
    });
}

/// Install the global Prometheus recorder. Call once from the binary.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus: install recorder")?;
    describe_metrics();
    Ok(handle)
}

pub struct Telemetry {
    stats: Arc<UsageStats>,
}

impl Telemetry {
    pub fn new(stats: Arc<UsageStats>) -> Self {
        describe_metrics();
        Self { stats }
    }
}

impl EventSink for Telemetry {
    fn record(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::FetchAttempt { source } => {
                tracing::debug!(target: "rates", source = %source, "fetch attempt");
                counter!("rate_fetch_attempts_total", "source" => source.clone()).increment(1);
            }
            PipelineEvent::FetchSucceeded { source, value, elapsed } => {
                tracing::info!(target: "rates", source = %source, value = %value, elapsed_ms = elapsed.as_millis() as u64, "fetch ok");
                histogram!("rate_fetch_duration_seconds", "source" => source.clone())
                    .record(elapsed.as_secs_f64());
                gauge!("rate_last_value").set(value.to_f64().unwrap_or_default());
                self.stats.record_fetch(true);
            }
            PipelineEvent::FetchFailed { source, error, elapsed } => {
                tracing::warn!(target: "rates", source = %source, error = %error, elapsed_ms = elapsed.as_millis() as u64, "source failed");
                histogram!("rate_fetch_duration_seconds", "source" => source.clone())
                    .record(elapsed.as_secs_f64());
                counter!(
                    "rate_fetch_failures_total",
                    "source" => source.clone(),
                    "kind" => error.kind()
                )
                .increment(1);
                self.stats.record_fetch(false);
            }
            PipelineEvent::CacheHit => {
                tracing::debug!(target: "rates", "cache hit");
                counter!("rate_cache_hits_total").increment(1);
            }
            PipelineEvent::CacheMiss => {
                tracing::debug!(target: "rates", "cache miss");
                counter!("rate_cache_misses_total").increment(1);
            }
            PipelineEvent::PublishSucceeded { source, value } => {
                tracing::info!(target: "publish", source = %source, value = %value, "rate published");
                counter!("rate_publish_total").increment(1);
                self.stats.record_publish();
            }
            PipelineEvent::PublishSuppressed { value } => {
                tracing::debug!(target: "publish", value = %value, "unchanged rate, publish suppressed");
            }
            PipelineEvent::PublishFailed { error } => {
                tracing::warn!(target: "publish", error = %error, "channel delivery failed");
                counter!("rate_publish_failures_total").increment(1);
            }
            PipelineEvent::TickSkipped { error } => {
                tracing::warn!(target: "publish", error = %error, "tick skipped");
                counter!("rate_ticks_skipped_total").increment(1);
            }
            PipelineEvent::IntervalChanged { old_secs, new_secs } => {
                tracing::info!(target: "publish", old_secs, new_secs, "publish interval changed");
                gauge!("rate_publish_interval_secs").set(*new_secs as f64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_feeds_usage_stats() {
        let stats = Arc::new(UsageStats::new());
        let t = Telemetry::new(stats.clone());
        t.record(&PipelineEvent::FetchSucceeded {
            source: "A".into(),
            value: Decimal::from(95),
            elapsed: Duration::from_millis(120),
        });
        t.record(&PipelineEvent::FetchFailed {
            source: "B".into(),
            error: SourceError::fetch("timeout"),
            elapsed: Duration::from_secs(10),
        });
        t.record(&PipelineEvent::PublishSucceeded {
            source: "A".into(),
            value: Decimal::from(95),
        });
        let snap = stats.snapshot();
        assert_eq!(snap.fetch_ok, 1);
        assert_eq!(snap.fetch_failed, 1);
        assert_eq!(snap.publishes, 1);
    }
}
