//! Telegram transport: long-polls the Bot API for updates.
//!
//! Receives `message` and `channel_post` updates, sends with Markdown first
//! and a plain-text fallback, and copies media messages with a replaced
//! caption so attachments survive the trip.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use crate::channels::transport::{Conversation, EventStream, Transport};
use crate::error::TransportError;
use crate::filters::SenderInfo;
use crate::pipeline::types::{ChatKind, DocumentInfo, IncomingEvent, OutgoingMessage};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Message fields that mean "has an attachment".
const MEDIA_FIELDS: &[&str] = &[
    "photo",
    "video",
    "document",
    "audio",
    "voice",
    "animation",
    "video_note",
    "sticker",
];

type ConversationMap = Arc<RwLock<BTreeMap<i64, Conversation>>>;

/// Telegram transport: connects to the Bot API via long-polling.
pub struct TelegramTransport {
    bot_token: SecretString,
    client: reqwest::Client,
    /// Chats seen in updates; the Bot API has no dialog listing.
    conversations: ConversationMap,
    bot_id: OnceCell<i64>,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
            conversations: Arc::new(RwLock::new(BTreeMap::new())),
            bot_id: OnceCell::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://api.telegram.org/file/bot{}/{file_path}",
            self.bot_token.expose_secret()
        )
    }

    /// Call a Bot API method and return its `result`.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        let data: Value = resp.json().await.map_err(|e| e.to_string())?;

        if data.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(data.get("result").cloned().unwrap_or(Value::Null))
        } else {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            Err(format!("{method} returned {status}: {description}"))
        }
    }

    /// Call a method with `parse_mode: Markdown`, retrying without it if
    /// Telegram rejects the markup.
    async fn call_markdown_first(&self, method: &str, mut body: Value) -> Result<Value, String> {
        body["parse_mode"] = Value::String("Markdown".into());
        match self.call(method, &body).await {
            Ok(result) => Ok(result),
            Err(markdown_err) => {
                tracing::warn!(
                    method,
                    error = %markdown_err,
                    "Telegram call with Markdown failed; retrying without parse_mode"
                );
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                self.call(method, &body)
                    .await
                    .map_err(|plain_err| format!("markdown: {markdown_err}; plain: {plain_err}"))
            }
        }
    }

    /// Send text, split to Telegram's 4096 char limit.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            self.call_markdown_first("sendMessage", body)
                .await
                .map_err(|reason| TransportError::SendFailed { chat_id, reason })?;
        }
        Ok(())
    }

    async fn copy_with_caption(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        caption: &str,
    ) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "from_chat_id": from_chat_id,
            "message_id": message_id,
            "caption": caption,
        });
        self.call_markdown_first("copyMessage", body)
            .await
            .map(|_| ())
            .map_err(|reason| TransportError::SendFailed { chat_id, reason })
    }

    async fn bot_id(&self) -> Result<i64, String> {
        self.bot_id
            .get_or_try_init(|| async {
                let me = self.call("getMe", &serde_json::json!({})).await?;
                me.get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| "getMe returned no id".to_string())
            })
            .await
            .copied()
    }
}

fn api_url(token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        token.expose_secret()
    )
}

// ── Transport trait implementation ──────────────────────────────────

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, TransportError> {
        let me = self
            .bot_id()
            .await
            .map_err(|reason| TransportError::StartupFailed {
                name: "telegram".into(),
                reason,
            })?;
        tracing::info!(bot_id = me, "Telegram bot authenticated");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();
        let conversations = Arc::clone(&self.conversations);

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram transport listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    let description = api_description(&data);
                    tracing::warn!(description, "Telegram getUpdates returned no result");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(event) = parse_update(update) else {
                        continue;
                    };

                    conversations.write().await.insert(
                        event.chat_id,
                        Conversation {
                            id: event.chat_id,
                            title: event.chat_title.clone(),
                            kind: event.chat_kind,
                        },
                    );

                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        message: OutgoingMessage,
    ) -> Result<(), TransportError> {
        match message {
            OutgoingMessage::Text(text) => self.send_text(chat_id, &text).await,
            OutgoingMessage::Copy {
                from_chat_id,
                message_id,
                text,
            } => {
                self.copy_with_caption(chat_id, from_chat_id, message_id, &text)
                    .await
            }
        }
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError> {
        let text_body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        let text_err = match self.call("editMessageText", &text_body).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        // Media posts carry their text as a caption.
        let caption_body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "caption": text,
        });
        self.call("editMessageCaption", &caption_body)
            .await
            .map(|_| ())
            .map_err(|caption_err| TransportError::EditFailed {
                chat_id,
                message_id,
                reason: format!("text: {text_err}; caption: {caption_err}"),
            })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call("deleteMessage", &body)
            .await
            .map(|_| ())
            .map_err(|reason| TransportError::DeleteFailed {
                chat_id,
                message_id,
                reason,
            })
    }

    async fn can_edit_messages(&self, chat_id: i64) -> bool {
        let bot_id = match self.bot_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(chat_id, error = %e, "Cannot resolve bot id");
                return false;
            }
        };
        let body = serde_json::json!({ "chat_id": chat_id, "user_id": bot_id });
        match self.call("getChatMember", &body).await {
            Ok(member) => member_can_edit(&member),
            Err(e) => {
                tracing::debug!(chat_id, error = %e, "getChatMember failed");
                false
            }
        }
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        Ok(self.conversations.read().await.values().cloned().collect())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed {
                chat_id,
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(TransportError::SendFailed {
                chat_id,
                reason: format!("sendDocument failed: {err}"),
            });
        }

        tracing::info!(chat_id, file_name, "Telegram document sent");
        Ok(())
    }

    async fn download_document(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let download_err = |reason: String| TransportError::DownloadFailed {
            file_id: file_id.to_string(),
            reason,
        };

        let file = self
            .call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await
            .map_err(download_err)?;
        let file_path = file
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| download_err("getFile returned no file_path".into()))?;

        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(download_err(format!("file download returned {}", resp.status())));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The `description` of a failed Bot API response, or "" when absent.
fn api_description(data: &Value) -> &str {
    data.get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

/// Map a Bot API update to an event. `None` for update kinds the relay
/// does not handle.
fn parse_update(update: &Value) -> Option<IncomingEvent> {
    let message = update
        .get("message")
        .or_else(|| update.get("channel_post"))?;
    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?;
    let message_id = message.get("message_id").and_then(Value::as_i64)?;
    let chat_kind = ChatKind::from_api(chat.get("type").and_then(Value::as_str).unwrap_or(""));

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let sender = message.get("from").map(|from| SenderInfo {
        id: from.get("id").and_then(Value::as_i64).unwrap_or(0),
        username: str_field(from, "username"),
        first_name: str_field(from, "first_name"),
        last_name: str_field(from, "last_name"),
    });

    let document = message.get("document").and_then(|doc| {
        Some(DocumentInfo {
            file_id: doc.get("file_id").and_then(Value::as_str)?.to_string(),
            file_name: doc.get("file_name").and_then(Value::as_str).map(String::from),
            mime_type: doc.get("mime_type").and_then(Value::as_str).map(String::from),
        })
    });

    let has_media = MEDIA_FIELDS.iter().any(|field| message.get(field).is_some());
    let protected_content = [message, chat].iter().any(|v| {
        v.get("has_protected_content")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    });

    let received_at = message
        .get("date")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Some(IncomingEvent {
        chat_id,
        message_id,
        chat_kind,
        chat_title: chat_title(chat),
        text,
        sender,
        document,
        has_media,
        protected_content,
        received_at,
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Group/channel title, or the user's name for private chats.
fn chat_title(chat: &Value) -> String {
    if let Some(title) = chat.get("title").and_then(Value::as_str) {
        return title.to_string();
    }
    let name = format!("{} {}", str_field(chat, "first_name"), str_field(chat, "last_name"));
    match name.trim() {
        "" => str_field(chat, "username"),
        n => n.to_string(),
    }
}

/// Whether a ChatMember result allows editing others' messages.
fn member_can_edit(member: &Value) -> bool {
    match member.get("status").and_then(Value::as_str) {
        Some("creator") => true,
        Some("administrator") => member
            .get("can_edit_messages")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        _ => false,
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset just past the first `max_len` characters
        let Some((limit, _)) = remaining.char_indices().nth(max_len) else {
            chunks.push(remaining.to_string());
            break;
        };

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> TelegramTransport {
        TelegramTransport::new(SecretString::from("123:ABC"))
    }

    #[test]
    fn telegram_transport_name() {
        assert_eq!(transport().name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            transport().api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
        assert_eq!(
            transport().file_url("documents/file_1.csv"),
            "https://api.telegram.org/file/bot123:ABC/documents/file_1.csv"
        );
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn parse_group_message_with_sender() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 77,
                "date": 1700000000,
                "chat": {"id": -1001234, "type": "supergroup", "title": "Traders"},
                "from": {"id": 42, "is_bot": false, "first_name": "Alice", "last_name": "Liddell", "username": "alice"},
                "text": "buy low"
            }
        });
        let event = parse_update(&update).unwrap();
        assert_eq!(event.chat_id, -1001234);
        assert_eq!(event.message_id, 77);
        assert_eq!(event.chat_kind, ChatKind::Group);
        assert_eq!(event.chat_title, "Traders");
        assert_eq!(event.text, "buy low");
        let sender = event.sender.unwrap();
        assert_eq!(sender.id, 42);
        assert_eq!(sender.username, "alice");
        assert_eq!(sender.last_name, "Liddell");
        assert!(!event.has_media);
        assert!(!event.protected_content);
        assert_eq!(event.received_at.timestamp(), 1700000000);
    }

    #[test]
    fn parse_channel_post_with_caption() {
        let update = serde_json::json!({
            "update_id": 11,
            "channel_post": {
                "message_id": 5,
                "date": 1700000000,
                "chat": {"id": -1005555, "type": "channel", "title": "News", "has_protected_content": true},
                "photo": [{"file_id": "p1", "width": 90, "height": 90}],
                "caption": "breaking"
            }
        });
        let event = parse_update(&update).unwrap();
        assert_eq!(event.chat_kind, ChatKind::Channel);
        assert_eq!(event.text, "breaking");
        assert!(event.sender.is_none());
        assert!(event.has_media);
        assert!(event.protected_content);
    }

    #[test]
    fn parse_private_document() {
        let update = serde_json::json!({
            "update_id": 12,
            "message": {
                "message_id": 3,
                "date": 1700000000,
                "chat": {"id": 42, "type": "private", "first_name": "Alice"},
                "from": {"id": 42, "first_name": "Alice"},
                "document": {"file_id": "doc1", "file_name": "rules.csv", "mime_type": "text/csv"}
            }
        });
        let event = parse_update(&update).unwrap();
        assert_eq!(event.chat_kind, ChatKind::Private);
        assert_eq!(event.chat_title, "Alice");
        assert_eq!(event.text, "");
        let doc = event.document.unwrap();
        assert_eq!(doc.file_id, "doc1");
        assert!(doc.is_csv());
    }

    #[test]
    fn parse_ignores_other_updates() {
        let update = serde_json::json!({
            "update_id": 13,
            "edited_message": {"message_id": 1, "chat": {"id": 1, "type": "private"}}
        });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn failed_response_description() {
        let data = serde_json::json!({"ok": false, "error_code": 409, "description": "Conflict"});
        assert_eq!(api_description(&data), "Conflict");
        assert_eq!(api_description(&serde_json::json!({"ok": true})), "");
    }

    #[test]
    fn member_edit_rights() {
        assert!(member_can_edit(&serde_json::json!({"status": "creator"})));
        assert!(member_can_edit(
            &serde_json::json!({"status": "administrator", "can_edit_messages": true})
        ));
        assert!(!member_can_edit(&serde_json::json!({"status": "administrator"})));
        assert!(!member_can_edit(&serde_json::json!({"status": "member"})));
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_counts_characters_not_bytes() {
        let msg = "ж".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 904);
    }
}
