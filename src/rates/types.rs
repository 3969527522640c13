// src/rates/types.rs
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::error::{AllSourcesFailed, SourceError};

/// One extracted rate with provenance. Fields are private so a quote can
/// only be built through [`RateQuote::new`], which rejects non-positive values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateQuote {
    value: Decimal,
    source: String,
    url: Option<String>,
    fetched_at: DateTime<Utc>,
}

impl RateQuote {
    pub fn new(value: Decimal, source: impl Into<String>) -> Result<Self, SourceError> {
        Self::at(value, source, Utc::now())
    }

    pub fn at(
        value: Decimal,
        source: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, SourceError> {
        if value <= Decimal::ZERO {
            return Err(SourceError::parse(format!(
                "rate must be positive, got {value}"
            )));
        }
        Ok(Self {
            value,
            source: source.into(),
            url: None,
            fetched_at,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

/// Parse a number as it appears on rate pages: `95.43`, `95,43`, ` 95 `.
pub fn parse_rate_number(raw: &str) -> Result<Decimal, SourceError> {
    let cleaned = raw.trim().replace(',', ".");
    let value = Decimal::from_str(&cleaned)
        .map_err(|e| SourceError::parse(format!("not a number '{}': {e}", raw.trim())))?;
    if value <= Decimal::ZERO {
        return Err(SourceError::parse(format!(
            "rate must be positive, got {value}"
        )));
    }
    Ok(value)
}

/// One upstream endpoint. Implementations own their fetch + extraction.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_quote(&self) -> Result<RateQuote, SourceError>;
    fn name(&self) -> &str;
}

/// Anything that can produce a fresh quote: the aggregator in production,
/// scripted doubles in tests.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch(&self) -> Result<RateQuote, AllSourcesFailed>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn comma_and_dot_separators_parse_the_same() {
        assert_eq!(
            parse_rate_number("95,43").unwrap(),
            parse_rate_number("95.43").unwrap()
        );
        assert_eq!(
            parse_rate_number(" 81 ").unwrap(),
            Decimal::from(81)
        );
    }

    #[test]
    fn zero_negative_and_garbage_are_parse_errors() {
        for raw in ["0", "0.00", "-3.5", "abc", ""] {
            let err = parse_rate_number(raw).unwrap_err();
            assert_eq!(err.kind(), "parse", "input {raw:?}");
        }
    }

    #[test]
    fn quote_rejects_non_positive_value() {
        assert!(RateQuote::new(Decimal::ZERO, "X").is_err());
        assert!(RateQuote::new(Decimal::NEGATIVE_ONE, "X").is_err());
        let q = RateQuote::new(Decimal::new(9543, 2), "X")
            .unwrap()
            .with_url("https://x.test");
        assert_eq!(q.value().to_string(), "95.43");
        assert_eq!(q.url(), Some("https://x.test"));
    }
}
