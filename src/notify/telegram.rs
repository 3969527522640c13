use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Messenger;

const API_BASE: &str = "https://api.telegram.org";
const NOT_MODIFIED: &str = "message is not modified";

/// Minimal Telegram Bot API client: long-poll `getUpdates`, replies, and
/// one pinned channel post per chat that is edited in place on each publish.
#[derive(Clone)]
pub struct TelegramClient {
    base: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    /// chat id → message id of the post being kept up to date.
    pinned: Arc<Mutex<HashMap<String, i64>>>,
    bot_id: Arc<Mutex<Option<i64>>>,
}

/// The Bot API answered with a 4xx that retrying won't fix.
#[derive(Debug, Error)]
#[error("telegram {method} rejected ({status}): {description}")]
pub struct ApiRejected {
    pub method: &'static str,
    pub status: u16,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// Only filled in by `getChat`.
    #[serde(default)]
    pub pinned_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct EditMessageText<'a> {
    chat_id: &'a str,
    message_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct PinChatMessage<'a> {
    chat_id: &'a str,
    message_id: i64,
    disable_notification: bool,
}

#[derive(Serialize)]
struct ChatRef<'a> {
    chat_id: &'a str,
}

fn parse_topic(topic: Option<&str>) -> Result<Option<i64>> {
    topic
        .map(|t| {
            t.trim()
                .parse::<i64>()
                .with_context(|| format!("TOPIC_ID '{t}' is not numeric"))
        })
        .transpose()
}

fn is_not_modified(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiRejected>()
        .is_some_and(|r| r.description.to_ascii_lowercase().contains(NOT_MODIFIED))
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(API_BASE, token)
    }

    /// Point at a different Bot API server (self-hosted or a test double).
    pub fn with_base_url(base_url: &str, token: &str) -> Self {
        Self {
            base: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            pinned: Arc::default(),
            bot_id: Arc::default(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// POST one Bot API method, retrying transport errors, 5xx and 429 with
    /// exponential backoff. Other 4xx fail at once as [`ApiRejected`].
    async fn call<P, T>(&self, method: &'static str, payload: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) if rsp.status().is_success() => {
                    let body: ApiResponse<T> = rsp
                        .json()
                        .await
                        .with_context(|| format!("telegram {method} body"))?;
                    if !body.ok {
                        return Err(anyhow!(
                            "telegram {method} not ok: {}",
                            body.description.unwrap_or_default()
                        ));
                    }
                    return body
                        .result
                        .with_context(|| format!("telegram {method} returned no result"));
                }
                Ok(rsp) if rsp.status().is_client_error() && rsp.status().as_u16() != 429 => {
                    let status = rsp.status().as_u16();
                    let raw = rsp.text().await.unwrap_or_default();
                    let description = serde_json::from_str::<ApiResponse<serde_json::Value>>(&raw)
                        .ok()
                        .and_then(|r| r.description)
                        .unwrap_or(raw);
                    return Err(ApiRejected {
                        method,
                        status,
                        description,
                    }
                    .into());
                }
                Ok(rsp) => anyhow!("telegram {method} HTTP error: {}", rsp.status()),
                Err(e) => anyhow!("telegram {method} request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            let backoff = 500u64 << (attempt - 1).min(6);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    pub async fn send_text(
        &self,
        chat_id: &str,
        topic: Option<&str>,
        text: &str,
        markdown: bool,
    ) -> Result<Message> {
        let payload = SendMessage {
            chat_id,
            text,
            message_thread_id: parse_topic(topic)?,
            parse_mode: markdown.then_some("Markdown"),
            disable_web_page_preview: true,
        };
        self.call("sendMessage", &payload).await
    }

    /// Long-poll for new updates. `poll_secs` is the server-side wait.
    pub async fn get_updates(&self, offset: Option<i64>, poll_secs: u64) -> Result<Vec<Update>> {
        let url = format!("{}/getUpdates", self.base);
        let mut query: Vec<(&str, String)> = vec![
            ("timeout", poll_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(o) = offset {
            query.push(("offset", o.to_string()));
        }

        let rsp: ApiResponse<Vec<Update>> = self
            .client
            .get(&url)
            .query(&query)
            .timeout(Duration::from_secs(poll_secs) + self.timeout)
            .send()
            .await
            .context("telegram getUpdates")?
            .json()
            .await
            .context("telegram getUpdates body")?;

        if !rsp.ok {
            return Err(anyhow!(
                "telegram getUpdates not ok: {}",
                rsp.description.unwrap_or_default()
            ));
        }
        Ok(rsp.result.unwrap_or_default())
    }

    async fn bot_id(&self) -> Result<i64> {
        if let Some(id) = *self.bot_id.lock() {
            return Ok(id);
        }
        let me: User = self.call("getMe", &serde_json::json!({})).await?;
        *self.bot_id.lock() = Some(me.id);
        Ok(me.id)
    }

    /// The post to edit in `chat_id`: remembered from an earlier publish, or
    /// the chat's pinned message when this bot wrote it (survives restarts).
    async fn channel_post(&self, chat_id: &str) -> Option<i64> {
        if let Some(id) = self.pinned.lock().get(chat_id).copied() {
            return Some(id);
        }
        let lookup = async {
            let chat: Chat = self.call("getChat", &ChatRef { chat_id }).await?;
            let mut found = None;
            if let Some(pinned) = chat.pinned_message {
                let me = self.bot_id().await?;
                if pinned.from.as_ref().is_some_and(|u| u.id == me) {
                    found = Some(pinned.message_id);
                }
            }
            anyhow::Ok(found)
        };
        match lookup.await {
            Ok(Some(id)) => {
                tracing::info!(target: "notify", chat = chat_id, message_id = id, "found pinned rate post");
                self.pinned.lock().insert(chat_id.to_string(), id);
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(target: "notify", chat = chat_id, error = %format!("{e:#}"), "pinned post lookup failed");
                None
            }
        }
    }

    /// Edit the channel's rate post in place, or send and pin a new one when
    /// there is nothing to edit. An unchanged text counts as delivered.
    pub async fn publish_pinned(&self, chat_id: &str, topic: Option<&str>, text: &str) -> Result<()> {
        if let Some(message_id) = self.channel_post(chat_id).await {
            let edit = EditMessageText {
                chat_id,
                message_id,
                text,
                parse_mode: "Markdown",
                disable_web_page_preview: true,
            };
            match self.call::<_, serde_json::Value>("editMessageText", &edit).await {
                Ok(_) => {
                    tracing::debug!(target: "notify", chat = chat_id, message_id, "rate post edited");
                    return Ok(());
                }
                Err(e) if is_not_modified(&e) => {
                    tracing::debug!(target: "notify", chat = chat_id, message_id, "rate post unchanged");
                    return Ok(());
                }
                Err(e) if e.downcast_ref::<ApiRejected>().is_some() => {
                    // Deleted or no longer editable: start a new post.
                    tracing::warn!(target: "notify", chat = chat_id, message_id, error = %e, "rate post not editable");
                    self.pinned.lock().remove(chat_id);
                }
                Err(e) => return Err(e),
            }
        }

        let sent = self.send_text(chat_id, topic, text, true).await?;
        self.pinned
            .lock()
            .insert(chat_id.to_string(), sent.message_id);
        let pin = PinChatMessage {
            chat_id,
            message_id: sent.message_id,
            disable_notification: true,
        };
        if let Err(e) = self.call::<_, bool>("pinChatMessage", &pin).await {
            tracing::warn!(target: "notify", chat = chat_id, message_id = sent.message_id, error = %format!("{e:#}"), "pin failed");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Messenger for TelegramClient {
    async fn send_message(&self, channel: &str, topic: Option<&str>, text: &str) -> Result<()> {
        self.publish_pinned(channel, topic, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_json_decodes() {
        let raw = r#"{"ok":true,"result":[{"update_id":7,"message":{"message_id":1,
            "chat":{"id":-100},"from":{"id":5,"first_name":"Ann","is_bot":false},
            "text":"/get_rate"}}]}"#;
        let rsp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(rsp.ok);
        let ups = rsp.result.unwrap();
        let msg = ups[0].message.as_ref().unwrap();
        assert_eq!(msg.text.as_deref(), Some("/get_rate"));
        assert_eq!(msg.from.as_ref().unwrap().id, 5);
        assert_eq!(msg.message_thread_id, None);
    }

    #[test]
    fn payload_omits_empty_topic() {
        let p = SendMessage {
            chat_id: "@c",
            text: "hi",
            message_thread_id: None,
            parse_mode: Some("Markdown"),
            disable_web_page_preview: true,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("message_thread_id").is_none());
        assert_eq!(v["parse_mode"], "Markdown");
    }

    #[test]
    fn not_modified_is_recognised_only_on_rejections() {
        let rejected = anyhow::Error::from(ApiRejected {
            method: "editMessageText",
            status: 400,
            description: "Bad Request: message is not modified: specified new message content is the same".into(),
        });
        assert!(is_not_modified(&rejected));
        assert!(!is_not_modified(&anyhow!("message is not modified")));
    }

    #[tokio::test]
    async fn non_numeric_topic_fails_before_any_request() {
        let c = TelegramClient::with_base_url("http://127.0.0.1:9", "x");
        let err = c.send_text("@c", Some("general"), "hi", false).await.unwrap_err();
        assert!(err.to_string().contains("TOPIC_ID"));
    }

    #[tokio::test(start_paused = true)]
    async fn many_retries_do_not_overflow_backoff() {
        let c = TelegramClient::with_base_url("http://127.0.0.1:9", "x").with_retries(70);
        let err = c.send_text("@c", None, "hi", false).await.unwrap_err();
        assert!(err.to_string().contains("sendMessage request failed"), "{err:#}");
    }
}
