pub mod telegram;

use anyhow::Result;

pub use telegram::TelegramClient;

/// Outbound channel. The scheduler calls this from its firing step only and
/// does not retry; implementations may.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, channel: &str, topic: Option<&str>, text: &str) -> Result<()>;
}

/// Logs instead of sending. Used when no channel is wired (dry runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessenger;

#[async_trait::async_trait]
impl Messenger for LogMessenger {
    async fn send_message(&self, channel: &str, topic: Option<&str>, text: &str) -> Result<()> {
        tracing::info!(target: "notify", channel, topic = ?topic, text, "message (log only)");
        Ok(())
    }
}
