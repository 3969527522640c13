use rust_decimal::Decimal;
use serde_json::Value;

use super::SourceParser;
use crate::rates::error::SourceError;
use crate::rates::types::parse_rate_number;

/// JSON APIs (CoinGecko `simple/price`): walk a dotted path such as
/// `tether.rub` and read a number or numeric string at the end.
#[derive(Debug, Clone)]
pub struct JsonPathParser {
    path: Vec<String>,
}

impl JsonPathParser {
    pub fn new(path: &str) -> Self {
        Self {
            path: path
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl SourceParser for JsonPathParser {
    fn extract(&self, raw: &str) -> Result<Decimal, SourceError> {
        let root: Value = serde_json::from_str(raw)
            .map_err(|e| SourceError::parse(format!("invalid json: {e}")))?;

        let mut cur = &root;
        for key in &self.path {
            cur = match cur {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| {
                SourceError::parse(format!("missing field '{}'", self.path.join(".")))
            })?;
        }

        match cur {
            Value::Number(n) => parse_rate_number(&n.to_string()),
            Value::String(s) => parse_rate_number(s),
            other => Err(SourceError::parse(format!(
                "field '{}' is not numeric: {other}",
                self.path.join(".")
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        "json_path"
    }
}
