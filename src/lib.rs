// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bot;
pub mod config;
pub mod notify;
pub mod publish;
pub mod rates;
pub mod service;
pub mod stats;
pub mod telemetry;
pub mod users;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::publish::{PublishPolicy, PublishScheduler, ScheduleHandle, ScheduleState};
pub use crate::rates::{
    AllSourcesFailed, InvalidConfigError, RateAggregator, RateCache, RateQuote, RateSource,
    SourceError,
};
pub use crate::service::RateService;

/// Default `tracing` filter: every target this crate logs under at info,
/// everything else at warn.
pub const DEFAULT_LOG_FILTER: &str =
    "usdt_rate_bot=info,rates=info,publish=info,bot=info,users=info,notify=info,warn";
