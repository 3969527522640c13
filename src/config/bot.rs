// src/config/bot.rs
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::publish::PublishPolicy;

fn default_interval_secs() -> u64 {
    600
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_fetch_timeout_secs() -> u64 {
    10
}

/// Process configuration read from the environment (`.env` is loaded first
/// by the binary).
#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub token: String,
    pub channel_id: String,
    /// Forum topic (message thread) inside the channel.
    pub topic_id: Option<String>,
    pub admins: Vec<i64>,
    pub publish_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    pub policy: PublishPolicy,
    pub publish_on_start: bool,
    /// Log channel posts instead of sending them.
    pub dry_run: bool,
    pub users_path: PathBuf,
    pub http_addr: String,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads through `get`, so tests
    /// don't have to touch the process environment.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let Some(token) = non_empty("BOT_TOKEN") else {
            bail!("BOT_TOKEN is not set");
        };
        let Some(channel_id) = non_empty("CHANNEL_ID") else {
            bail!("CHANNEL_ID is not set");
        };

        let admins = match non_empty("ADMINS") {
            None => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<i64>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ADMINS is not a JSON array of ids, ignoring");
                Vec::new()
            }),
        };

        let secs = |key: &str, default: u64| -> Result<u64> {
            match non_empty(key) {
                None => Ok(default),
                Some(v) => {
                    let n: u64 = v.parse().with_context(|| format!("{key}={v} is not a number"))?;
                    if n == 0 {
                        bail!("{key} must be at least 1");
                    }
                    Ok(n)
                }
            }
        };

        let policy = match non_empty("PUBLISH_POLICY") {
            None => PublishPolicy::default(),
            Some(v) => v.parse()?,
        };

        Ok(Self {
            token,
            channel_id,
            topic_id: non_empty("TOPIC_ID"),
            admins,
            publish_interval_secs: secs("SLEEP_TIME", default_interval_secs())?,
            cache_ttl_secs: secs("CACHE_TTL", default_cache_ttl_secs())?,
            fetch_timeout_secs: secs("FETCH_TIMEOUT_SECS", default_fetch_timeout_secs())?,
            policy,
            publish_on_start: non_empty("PUBLISH_ON_START").is_some_and(|v| v == "1"),
            dry_run: non_empty("DRY_RUN").is_some_and(|v| v == "1"),
            users_path: non_empty("USERS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/users.json")),
            http_addr: non_empty("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
        })
    }
}
