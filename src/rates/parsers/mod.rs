// src/rates/parsers/mod.rs
pub mod json_path;
pub mod keyword;
pub mod symbol_scan;

use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::config::sources::ExtractRule;
use crate::rates::error::SourceError;

pub use json_path::JsonPathParser;
pub use keyword::KeywordParser;
pub use symbol_scan::SymbolScanParser;

/// Number pattern shared by the text parsers: `95`, `95.43`, `95,43`.
pub(crate) const NUMBER: &str = r"\d+(?:[.,]\d+)?";

/// Extraction rule for one source. Given the raw body, return a strictly
/// positive rate or a `SourceError::Parse`.
pub trait SourceParser: Send + Sync {
    fn extract(&self, raw: &str) -> Result<Decimal, SourceError>;
    fn kind(&self) -> &'static str;
}

/// Decode HTML entities and collapse whitespace so regexes see plain text.
pub fn normalize_page_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&decoded, " ").to_string()
}

/// Build the parser a `SourceConfig` entry asks for.
pub fn build_parser(rule: &ExtractRule) -> Result<Box<dyn SourceParser>> {
    let parser: Box<dyn SourceParser> = match rule {
        ExtractRule::JsonPath { path } => Box::new(JsonPathParser::new(path)),
        ExtractRule::Keyword {
            keywords,
            symbol_floor,
        } => Box::new(KeywordParser::new(keywords, to_decimal(*symbol_floor)?)?),
        ExtractRule::SymbolScan { min, max } => {
            Box::new(SymbolScanParser::new(to_decimal(*min)?, to_decimal(*max)?)?)
        }
    };
    Ok(parser)
}

fn to_decimal(v: f64) -> Result<Decimal> {
    Decimal::from_f64(v).ok_or_else(|| anyhow::anyhow!("not a representable number: {v}"))
}
