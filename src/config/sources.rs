// src/config/sources.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PATH: &str = "SOURCES_CONFIG_PATH";

fn default_symbol_floor() -> f64 {
    20.0
}

/// How a rate is read out of a source body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractRule {
    /// Dotted path into a JSON body, e.g. `tether.rub`.
    JsonPath { path: String },
    /// First number after any of the keywords; `₽` scan above the floor as fallback.
    Keyword {
        keywords: Vec<String>,
        #[serde(default = "default_symbol_floor")]
        symbol_floor: f64,
    },
    /// Mean of all `₽`/`USDT…RUB` amounts strictly inside `(min, max)`.
    SymbolScan { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub rule: ExtractRule,
}

/// Ordered source list; order is fallback priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub user_agent: Option<String>,
    pub sources: Vec<SourceConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            sources: vec![
                SourceConfig {
                    name: "CoinGecko".into(),
                    url: "https://api.coingecko.com/api/v3/simple/price?ids=tether&vs_currencies=rub"
                        .into(),
                    rule: ExtractRule::JsonPath {
                        path: "tether.rub".into(),
                    },
                },
                SourceConfig {
                    name: "OKX".into(),
                    url: "https://www.okx.com/ru-eu/convert/usdt-to-rub".into(),
                    rule: ExtractRule::SymbolScan {
                        min: 50.0,
                        max: 200.0,
                    },
                },
            ],
        }
    }
}

impl SourcesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("no rate sources configured");
        }
        for s in &self.sources {
            if s.name.trim().is_empty() {
                bail!("source with url '{}' has an empty name", s.url);
            }
            if !(s.url.starts_with("http://") || s.url.starts_with("https://")) {
                bail!("source '{}': url must be absolute http(s), got '{}'", s.name, s.url);
            }
            match &s.rule {
                ExtractRule::JsonPath { path } if path.trim().is_empty() => {
                    bail!("source '{}': empty json path", s.name)
                }
                ExtractRule::Keyword { keywords, .. }
                    if keywords.iter().all(|k| k.trim().is_empty()) =>
                {
                    bail!("source '{}': no keywords", s.name)
                }
                ExtractRule::SymbolScan { min, max } if !(min < max) || *min < 0.0 => {
                    bail!("source '{}': invalid range ({min}, {max})", s.name)
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Load sources from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<SourcesConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_sources(&content, ext.as_str())
        .with_context(|| format!("parsing sources from {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid sources in {}", path.display()))?;
    Ok(cfg)
}

/// Load sources using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) built-in defaults
pub fn load_sources_default() -> Result<SourcesConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    tracing::info!("no sources file found, using built-in defaults");
    Ok(SourcesConfig::default())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<SourcesConfig> {
    let looks_json = s.trim_start().starts_with('{');
    if hint_ext == "json" || (hint_ext != "toml" && looks_json) {
        return serde_json::from_str(s).context("sources json");
    }
    toml::from_str(s).context("sources toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
user_agent = "test-agent"

[[sources]]
name = "CoinGecko"
url = "https://api.coingecko.com/api/v3/simple/price?ids=tether&vs_currencies=rub"
kind = "json_path"
path = "tether.rub"

[[sources]]
name = "Board"
url = "https://example.com/rates"
kind = "keyword"
keywords = ["Сейчас USDT = "]
"#;

    #[test]
    fn toml_keeps_order_and_defaults() {
        let cfg = parse_sources(TOML, "toml").unwrap();
        assert_eq!(cfg.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(cfg.sources.len(), 2);
        assert_eq!(cfg.sources[0].name, "CoinGecko");
        assert_eq!(
            cfg.sources[1].rule,
            ExtractRule::Keyword {
                keywords: vec!["Сейчас USDT = ".into()],
                symbol_floor: 20.0
            }
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn json_detected_by_content() {
        let json = r#"{"sources": [{"name": "OKX", "url": "https://www.okx.com/x",
            "kind": "symbol_scan", "min": 70, "max": 85}]}"#;
        let cfg = parse_sources(json, "").unwrap();
        assert_eq!(
            cfg.sources[0].rule,
            ExtractRule::SymbolScan {
                min: 70.0,
                max: 85.0
            }
        );
    }

    #[test]
    fn validation_rejects_bad_entries() {
        let mut cfg = SourcesConfig::default();
        cfg.validate().unwrap();

        cfg.sources[0].url = "ftp://nope".into();
        assert!(cfg.validate().is_err());

        let mut cfg = SourcesConfig::default();
        cfg.sources[1].rule = ExtractRule::SymbolScan {
            min: 90.0,
            max: 80.0,
        };
        assert!(cfg.validate().is_err());

        let cfg = SourcesConfig {
            user_agent: None,
            sources: vec![],
        };
        assert!(cfg.validate().is_err());
    }
}
