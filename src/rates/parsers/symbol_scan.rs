use once_cell::sync::OnceCell;
use regex::Regex;
use rust_decimal::Decimal;

use super::{normalize_page_text, SourceParser, NUMBER};
use crate::rates::error::{InvalidConfigError, SourceError};
use crate::rates::types::parse_rate_number;

/// Exchange converter pages (OKX) show the rate several times in different
/// layouts. Collect every amount next to `₽` or between `USDT` and `RUB`,
/// keep the plausible ones (`min < v < max`) and return their mean.
#[derive(Debug, Clone)]
pub struct SymbolScanParser {
    min: Decimal,
    max: Decimal,
}

impl SymbolScanParser {
    pub fn new(min: Decimal, max: Decimal) -> Result<Self, InvalidConfigError> {
        if min >= max || min < Decimal::ZERO {
            return Err(InvalidConfigError::PlausibleRange { min, max });
        }
        Ok(Self { min, max })
    }
}

fn patterns() -> &'static [Regex] {
    static RES: OnceCell<Vec<Regex>> = OnceCell::new();
    RES.get_or_init(|| {
        [
            format!(r"₽\s*({NUMBER})"),
            format!(r"({NUMBER})\s*₽"),
            format!(r"(?i)USDT.*?({NUMBER})\s*RUB"),
            format!(r"(?i)RUB.*?({NUMBER})\s*USDT"),
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

impl SourceParser for SymbolScanParser {
    fn extract(&self, raw: &str) -> Result<Decimal, SourceError> {
        let text = normalize_page_text(raw);

        let found: Vec<Decimal> = patterns()
            .iter()
            .flat_map(|re| re.captures_iter(&text))
            .filter_map(|cap| parse_rate_number(&cap[1]).ok())
            .filter(|v| *v > self.min && *v < self.max)
            .collect();

        if found.is_empty() {
            return Err(SourceError::parse(format!(
                "no amount within ({}, {})",
                self.min, self.max
            )));
        }

        let sum: Decimal = found.iter().copied().sum();
        Ok((sum / Decimal::from(found.len())).round_dp(4))
    }

    fn kind(&self) -> &'static str {
        "symbol_scan"
    }
}
