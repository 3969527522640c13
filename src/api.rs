use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::publish::ScheduleSnapshot;
use crate::rates::AllSourcesFailed;
use crate::service::RateService;
use crate::stats::{HealthStatus, StatsSnapshot, UsageStats};

#[derive(Clone)]
pub struct AppState {
    pub service: RateService,
    pub stats: Arc<UsageStats>,
}

/// Read-only status API. `/metrics` is mounted only when a Prometheus
/// recorder was installed.
pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/rate", get(current_rate))
        .route("/api/schedule", get(schedule))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    if let Some(handle) = metrics {
        app = app.merge(metrics_router(handle));
    }
    app
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}

#[derive(Serialize)]
struct FailureOut {
    source: String,
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct UnavailableOut {
    error: String,
    failures: Vec<FailureOut>,
}

impl From<AllSourcesFailed> for UnavailableOut {
    fn from(e: AllSourcesFailed) -> Self {
        Self {
            error: e.to_string(),
            failures: e
                .failures
                .into_iter()
                .map(|f| FailureOut {
                    kind: f.error.kind(),
                    message: f.error.to_string(),
                    source: f.source,
                })
                .collect(),
        }
    }
}

async fn current_rate(State(state): State<AppState>) -> Response {
    match state.service.get_current_rate().await {
        Ok(q) => Json(q).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UnavailableOut::from(e)),
        )
            .into_response(),
    }
}

/// 503 only when critical, so a warning does not fail liveness probes.
async fn health(State(state): State<AppState>) -> Response {
    let report = state.stats.health();
    let code = match report.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Warning => StatusCode::OK,
    };
    (code, Json(report)).into_response()
}

async fn schedule(State(state): State<AppState>) -> Json<ScheduleSnapshot> {
    Json(state.service.get_schedule_status())
}

async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}
