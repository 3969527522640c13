// src/rates/error.rs
use rust_decimal::Decimal;
use thiserror::Error;

/// Failure of a single source attempt. Local to one `fetch()`; the
/// aggregator logs it and moves on to the next source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network/HTTP layer: transport error, timeout, non-2xx status.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The source answered but no positive rate could be extracted.
    #[error("parse failed: {0}")]
    Parse(String),
}

impl SourceError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Short label used for metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Parse(_) => "parse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub error: SourceError,
}

/// Every configured source failed within one `fetch()`. One record per
/// source, in priority order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("all {} rate sources failed: {}", .failures.len(), describe(.failures))]
pub struct AllSourcesFailed {
    pub failures: Vec<SourceFailure>,
}

fn describe(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no sources configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.source, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Rejected admin input or configuration. Nothing is applied when this is
/// returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidConfigError {
    #[error("publish interval must be at least 1 second, got {0}")]
    Interval(i64),
    #[error("unknown publish policy '{0}' (expected heartbeat or on_change)")]
    Policy(String),
    #[error("invalid plausible range ({min}, {max}): need 0 <= min < max")]
    PlausibleRange { min: Decimal, max: Decimal },
}
