//! Telegram Bot API client.
//!
//! Outbound calls go through the [`Messenger`] trait so the controller can
//! be driven by a recording double in tests. [`TelegramBot`] implements it
//! over plain HTTPS with `reqwest`, and also long-polls `getUpdates` for
//! the inbound side.

use crate::error::PublishError;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const API_BASE: &str = "https://api.telegram.org";

/// One inline button carrying opaque callback data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

/// Outbound messaging primitives, keyed by chat and message id.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Returns the new message id.
    async fn send_text(
        &self,
        chat_id: &str,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError>;

    /// Returns the new message id.
    async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption_html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError>;

    async fn edit_text(
        &self,
        chat_id: &str,
        message_id: i64,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError>;

    async fn edit_caption(
        &self,
        chat_id: &str,
        message_id: i64,
        caption_html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError>;

    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<(), PublishError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Map a failed Bot API response onto [`PublishError`].
fn api_error(code: Option<i64>, description: Option<String>) -> PublishError {
    let description = description.unwrap_or_default();
    let lower = description.to_lowercase();
    if lower.contains("message is not modified") {
        PublishError::NotModified
    } else if lower.contains("message to delete not found")
        || lower.contains("message to edit not found")
        || lower.contains("message can't be deleted")
    {
        PublishError::MessageNotFound
    } else {
        PublishError::Rejected {
            code: code.unwrap_or_default(),
            description,
        }
    }
}

fn unpack<T>(raw: &str) -> Result<T, PublishError>
where
    T: DeserializeOwned,
{
    let parsed: ApiResponse<T> = serde_json::from_str(raw)
        .map_err(|e| PublishError::Malformed(format!("{e}: {}", truncate_for_log(raw, 200))))?;
    if !parsed.ok {
        return Err(api_error(parsed.error_code, parsed.description));
    }
    parsed
        .result
        .ok_or_else(|| PublishError::Malformed("ok response without result".to_string()))
}

/// Bot API client.
pub struct TelegramBot {
    client: Client,
    token: String,
}

impl fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramBot").field("token", &"<redacted>").finish()
    }
}

impl TelegramBot {
    /// `timeout` must exceed the long-poll timeout used with [`Self::get_updates`].
    pub fn new(token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(TelegramBot {
            client: Client::builder().timeout(timeout).build()?,
            token: token.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, PublishError> {
        let url = format!("{API_BASE}/bot{}/{method}", self.token);
        let raw = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await?
            .text()
            .await?;
        let result = unpack(&raw);
        if let Err(e) = &result {
            debug!(%method, error = %e, "Bot API call rejected");
        }
        result
    }

    /// Long-poll for updates after `offset`.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, PublishError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

fn with_keyboard(mut body: Value, keyboard: Option<&InlineKeyboard>) -> Value {
    if let Some(kb) = keyboard {
        body["reply_markup"] = json!(kb);
    }
    body
}

#[async_trait]
impl Messenger for TelegramBot {
    #[instrument(level = "info", skip(self, html, keyboard))]
    async fn send_text(
        &self,
        chat_id: &str,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError> {
        let body = with_keyboard(
            json!({
                "chat_id": chat_id,
                "text": html,
                "parse_mode": "HTML",
                "link_preview_options": { "is_disabled": false },
            }),
            keyboard,
        );
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    #[instrument(level = "info", skip(self, caption_html, keyboard))]
    async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption_html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64, PublishError> {
        let body = with_keyboard(
            json!({
                "chat_id": chat_id,
                "photo": photo_url,
                "caption": caption_html,
                "parse_mode": "HTML",
            }),
            keyboard,
        );
        let sent: SentMessage = self.call("sendPhoto", &body).await?;
        Ok(sent.message_id)
    }

    #[instrument(level = "info", skip(self, html, keyboard))]
    async fn edit_text(
        &self,
        chat_id: &str,
        message_id: i64,
        html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError> {
        let body = with_keyboard(
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": html,
                "parse_mode": "HTML",
            }),
            keyboard,
        );
        // editMessageText answers with the edited Message (or `true` for inline messages)
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    #[instrument(level = "info", skip(self, caption_html, keyboard))]
    async fn edit_caption(
        &self,
        chat_id: &str,
        message_id: i64,
        caption_html: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PublishError> {
        let body = with_keyboard(
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "caption": caption_html,
                "parse_mode": "HTML",
            }),
            keyboard,
        );
        let _: Value = self.call("editMessageCaption", &body).await?;
        Ok(())
    }

    #[instrument(level = "info", skip(self))]
    async fn delete_message(&self, chat_id: &str, message_id: i64) -> Result<(), PublishError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, text))]
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), PublishError> {
        let mut body = json!({ "callback_query_id": callback_id, "show_alert": show_alert });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let result: Result<bool, PublishError> = self.call("answerCallbackQuery", &body).await;
        if let Err(e) = &result {
            // stale queries (older than ~15 minutes) are rejected; nothing to retry
            warn!(error = %e, "Callback acknowledgement failed");
        }
        result.map(|_| ())
    }
}
