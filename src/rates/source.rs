// src/rates/source.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::sources::{SourceConfig, SourcesConfig};
use crate::rates::error::SourceError;
use crate::rates::parsers::{build_parser, SourceParser};
use crate::rates::types::{RateQuote, RateSource};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A configured upstream: where to get the body and how to read a rate out of it.
pub struct WebSource {
    name: String,
    url: String,
    parser: Box<dyn SourceParser>,
    mode: Mode,
}

enum Mode {
    // Canned body, used by tests and dry runs.
    Fixture(String),
    Http(Client),
}

impl WebSource {
    pub fn from_config(cfg: &SourceConfig, client: Client) -> Result<Self> {
        let parser = build_parser(&cfg.rule)
            .with_context(|| format!("building parser for source '{}'", cfg.name))?;
        Ok(Self {
            name: cfg.name.clone(),
            url: cfg.url.clone(),
            parser,
            mode: Mode::Http(client),
        })
    }

    pub fn from_fixture(
        name: impl Into<String>,
        parser: Box<dyn SourceParser>,
        body: &str,
    ) -> Self {
        Self {
            name: name.into(),
            url: String::new(),
            parser,
            mode: Mode::Fixture(body.to_string()),
        }
    }

    async fn body(&self) -> Result<String, SourceError> {
        match &self.mode {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Http(client) => {
                let resp = client
                    .get(&self.url)
                    .send()
                    .await
                    .map_err(|e| SourceError::fetch(format!("{}: {e}", self.url)))?;
                let resp = resp
                    .error_for_status()
                    .map_err(|e| SourceError::fetch(format!("{}: {e}", self.url)))?;
                resp.text()
                    .await
                    .map_err(|e| SourceError::fetch(format!("reading body: {e}")))
            }
        }
    }
}

#[async_trait]
impl RateSource for WebSource {
    async fn fetch_quote(&self) -> Result<RateQuote, SourceError> {
        let body = self.body().await?;
        if body.trim().is_empty() {
            return Err(SourceError::parse("empty body"));
        }
        let value = self.parser.extract(&body)?;
        let quote = RateQuote::new(value, &self.name)?;
        Ok(if self.url.is_empty() {
            quote
        } else {
            quote.with_url(&self.url)
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One shared HTTP client for all sources, bounded by the per-source timeout.
pub fn http_client(user_agent: Option<&str>, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .connect_timeout(timeout.min(Duration::from_secs(4)))
        .timeout(timeout)
        .build()
        .context("building http client")
}

/// Instantiate every configured source, in configuration (priority) order.
pub fn build_sources(cfg: &SourcesConfig, timeout: Duration) -> Result<Vec<WebSource>> {
    let client = http_client(cfg.user_agent.as_deref(), timeout)?;
    cfg.sources
        .iter()
        .map(|s| WebSource::from_config(s, client.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::parsers::KeywordParser;
    use rust_decimal::Decimal;

    fn keyword(k: &str) -> Box<dyn SourceParser> {
        Box::new(KeywordParser::new(&[k.to_string()], Decimal::from(20)).unwrap())
    }

    #[tokio::test]
    async fn fixture_source_builds_quote_with_its_name() {
        let src = WebSource::from_fixture("B", keyword("USDT/RUB"), "USDT/RUB: 95.43");
        let q = src.fetch_quote().await.unwrap();
        assert_eq!(q.source(), "B");
        assert_eq!(q.value().to_string(), "95.43");
        assert_eq!(q.url(), None);
    }

    #[tokio::test]
    async fn empty_body_is_parse_error() {
        let src = WebSource::from_fixture("A", keyword("USDT"), "   ");
        assert!(matches!(
            src.fetch_quote().await,
            Err(SourceError::Parse(_))
        ));
    }
}
