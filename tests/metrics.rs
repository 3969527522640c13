// tests/metrics.rs
//
// One test per binary: the Prometheus recorder is process-global.
mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::{RecordingMessenger, ScriptedSource};
use usdt_rate_bot::api::{self, AppState};
use usdt_rate_bot::publish::{PublishScheduler, PublishTarget, ScheduleState};
use usdt_rate_bot::rates::{RateAggregator, RateCache, RateSource, SourceError};
use usdt_rate_bot::service::RateService;
use usdt_rate_bot::stats::UsageStats;
use usdt_rate_bot::telemetry::{install_prometheus, EventSink, Telemetry};

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let handle = install_prometheus().expect("recorder installs once");

    let stats = Arc::new(UsageStats::new());
    let events: Arc<dyn EventSink> = Arc::new(Telemetry::new(stats.clone()));
    let sources: Vec<Arc<dyn RateSource>> = vec![
        ScriptedSource::failing("A", SourceError::fetch("HTTP 503")),
        ScriptedSource::ok("B", "95.43"),
    ];
    let aggregator = Arc::new(RateAggregator::new(
        sources,
        Duration::from_secs(10),
        events.clone(),
    ));
    let cache = Arc::new(RateCache::new(
        aggregator,
        Duration::from_secs(300),
        events.clone(),
    ));
    let scheduler = PublishScheduler::new(
        ScheduleState::new(600).unwrap(),
        cache.clone(),
        RecordingMessenger::new(),
        PublishTarget {
            channel: "@c".into(),
            topic: None,
        },
        events.clone(),
    );
    scheduler.handle().set_interval(900).unwrap();
    let app = api::router(
        AppState {
            service: RateService::new(cache, scheduler.handle()),
            stats: stats.clone(),
        },
        Some(handle),
    );

    // MISS then HIT
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(Request::get("/api/rate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "rate_fetch_attempts_total",
        "rate_fetch_failures_total",
        "rate_cache_hits_total",
        "rate_cache_misses_total",
        "rate_last_value",
        "rate_fetch_duration_seconds",
        "rate_publish_interval_secs",
    ] {
        assert!(text.contains(needle), "missing series {needle} in:\n{text}");
    }
    assert!(text.contains(r#"kind="fetch""#));

    let snap = stats.snapshot();
    assert_eq!((snap.fetch_ok, snap.fetch_failed), (1, 1));
}
