// src/publish/policy.rs
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::rates::{InvalidConfigError, RateQuote};

/// Whether an unchanged rate is republished on a tick.
///
/// `Heartbeat` (default) posts on every successful tick so subscribers see
/// the channel is alive. `OnChange` posts only when the value moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    #[default]
    Heartbeat,
    OnChange,
}

impl PublishPolicy {
    /// Check if `next` should be published given the last published quote.
    /// Does NOT mutate state; the scheduler records the publish itself.
    pub fn should_publish(&self, last: Option<&RateQuote>, next: &RateQuote) -> bool {
        match (self, last) {
            (PublishPolicy::Heartbeat, _) => true,
            (PublishPolicy::OnChange, None) => true,
            (PublishPolicy::OnChange, Some(prev)) => prev.value() != next.value(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::OnChange => "on_change",
        }
    }
}

impl FromStr for PublishPolicy {
    type Err = InvalidConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "heartbeat" => Ok(Self::Heartbeat),
            "on_change" | "onchange" => Ok(Self::OnChange),
            other => Err(InvalidConfigError::Policy(other.to_string())),
        }
    }
}
