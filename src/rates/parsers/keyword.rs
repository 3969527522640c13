use once_cell::sync::OnceCell;
use regex::Regex;
use rust_decimal::Decimal;

use super::{normalize_page_text, SourceParser, NUMBER};
use crate::rates::error::SourceError;
use crate::rates::types::parse_rate_number;

/// Keyword-anchored scan for HTML pages and plain-text feeds.
///
/// For each keyword (in order) the first number following it wins; tag
/// brackets, quotes, `:`/`=`/`-`/`/` and ASCII letters between keyword and
/// number are skipped. With no keyword hit, the first `₽ <number>` above
/// `symbol_floor` is used.
#[derive(Debug, Clone)]
pub struct KeywordParser {
    patterns: Vec<Regex>,
    symbol_floor: Decimal,
}

impl KeywordParser {
    pub fn new(keywords: &[String], symbol_floor: Decimal) -> Result<Self, regex::Error> {
        let patterns = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                Regex::new(&format!(
                    r#"(?i){}[\s:<>\-/a-zA-Z"'=]*?({NUMBER})"#,
                    regex::escape(k)
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            symbol_floor,
        })
    }
}

impl SourceParser for KeywordParser {
    fn extract(&self, raw: &str) -> Result<Decimal, SourceError> {
        let text = normalize_page_text(raw);

        for re in &self.patterns {
            if let Some(m) = re.captures(&text).and_then(|c| c.get(1)) {
                return parse_rate_number(m.as_str());
            }
        }

        static RE_RUB: OnceCell<Regex> = OnceCell::new();
        let re_rub = RE_RUB.get_or_init(|| Regex::new(&format!(r"₽\s*({NUMBER})")).unwrap());
        for cap in re_rub.captures_iter(&text) {
            if let Ok(v) = parse_rate_number(&cap[1]) {
                if v > self.symbol_floor {
                    return Ok(v);
                }
            }
        }

        Err(SourceError::parse("no keyword or ₽ amount found"))
    }

    fn kind(&self) -> &'static str {
        "keyword"
    }
}
