//! Telegram Bot API transport
//!
//! Long-polls `getUpdates` and pushes every accepted message into the
//! dispatcher queue. Replies go out through `sendMessage` / `sendVoice`,
//! presence through `sendChatAction`, and photos are fetched with `getFile`.
//!
//! The bot token is part of every URL, so reqwest errors are stripped of
//! their URL and all outgoing text is scrubbed before it leaves the process.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use sdk::errors::EngineError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::{InboundContent, InboundEvent, OutboundMessage, Payload, Presence, Transport};
use crate::config::TelegramConfig;
use crate::memory::ConversationKey;
use crate::secrets::{scrub, SecretString};

/// Telegram rejects longer messages
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone)]
struct BotIdentity {
    id: i64,
    key: String,
    username: Option<String>,
}

pub struct TelegramTransport {
    base_url: String,
    token: SecretString,
    allowed_users: Vec<i64>,
    poll_timeout_secs: u64,
    client: Client,
    bot: BotIdentity,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("bot", &self.bot)
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Deserialize, Debug, Default)]
struct TgMessage {
    message_id: i64,
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    caption_entities: Vec<Entity>,
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Deserialize, Debug, Default)]
struct Chat {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize, Debug, Clone)]
struct User {
    id: i64,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PhotoSize {
    file_id: String,
}

#[derive(Deserialize, Debug)]
struct Entity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
    length: usize,
    user: Option<User>,
}

#[derive(Deserialize, Debug)]
struct TgFile {
    file_path: Option<String>,
}

/// Slice `text` by UTF-16 code units, the way Telegram counts entity offsets
fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    units
        .get(offset..end)
        .map(String::from_utf16_lossy)
}

fn transport_err(method: &str, e: reqwest::Error) -> EngineError {
    EngineError::Transport(scrub(&format!("{}: {}", method, e.without_url())))
}

impl TelegramTransport {
    /// Connect and identify the bot account with `getMe`
    pub async fn connect(config: &TelegramConfig, token: SecretString) -> Result<Self, EngineError> {
        let mut transport = Self::with_identity(config, token, 0, None);
        let me: User = transport.call("getMe", json!({})).await?;
        info!(
            "Telegram bot connected as @{}",
            me.username.as_deref().unwrap_or("<unnamed>")
        );
        transport.bot = BotIdentity {
            id: me.id,
            key: me.id.to_string(),
            username: me.username,
        };
        Ok(transport)
    }

    fn with_identity(
        config: &TelegramConfig,
        token: SecretString,
        bot_id: i64,
        username: Option<String>,
    ) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            allowed_users: config.allowed_users.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            client: Client::builder()
                .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
                .build()
                .unwrap_or_default(),
            bot: BotIdentity {
                id: bot_id,
                key: bot_id.to_string(),
                username,
            },
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.bot.username.as_deref()
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token.expose(), method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, EngineError> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_err(method, e))?;

        Self::unwrap_response(method, response).await
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| transport_err(method, e))?;

        if !parsed.ok {
            return Err(EngineError::Transport(format!(
                "{} failed: {}",
                method,
                parsed.description.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        parsed
            .result
            .ok_or_else(|| EngineError::Transport(format!("{} returned no result", method)))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, EngineError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    /// Long-poll until `shutdown` flips or the queue closes
    pub async fn run_polling(
        &self,
        queue: mpsc::Sender<InboundEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting Telegram long-polling loop");
        let mut offset = 0;

        loop {
            let updates = tokio::select! {
                result = self.get_updates(offset) => result,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = update.update_id + 1;
                        let Some(event) = update.message.and_then(|m| self.to_event(m)) else {
                            continue;
                        };
                        if queue.send(event).await.is_err() {
                            info!("Inbound queue closed, stopping Telegram polling");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to fetch Telegram updates: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => {}
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Telegram polling stopped");
    }

    fn to_event(&self, msg: TgMessage) -> Option<InboundEvent> {
        let Some(from) = msg.from.as_ref() else {
            debug!("Message with no sender in chat {} - ignoring", msg.chat.id);
            return None;
        };

        if !self.allowed_users.is_empty() && !self.allowed_users.contains(&from.id) {
            warn!("Ignoring message from user {} outside allowed_users", from.id);
            return None;
        }

        let (body, entities) = match (&msg.text, &msg.caption) {
            (Some(text), _) => (Some(text.as_str()), &msg.entities),
            (None, Some(caption)) => (Some(caption.as_str()), &msg.caption_entities),
            (None, None) => (None, &msg.entities),
        };

        let content = match (body, msg.photo.last()) {
            (Some(text), _) => InboundContent::Text(text.to_string()),
            (None, Some(photo)) => InboundContent::Image {
                reference: photo.file_id.clone(),
            },
            (None, None) => InboundContent::Empty,
        };

        let mentions = body
            .map(|text| {
                entities
                    .iter()
                    .filter_map(|entity| self.mention_key(text, entity))
                    .collect()
            })
            .unwrap_or_default();

        let display_name = match &from.last_name {
            Some(last) if !from.first_name.is_empty() => {
                Some(format!("{} {}", from.first_name, last))
            }
            _ if !from.first_name.is_empty() => Some(from.first_name.clone()),
            _ => from.username.clone(),
        };

        Some(InboundEvent {
            id: msg.message_id.to_string(),
            conversation: ConversationKey::new(msg.chat.id.to_string()),
            author: from.id.to_string(),
            is_group: matches!(msg.chat.kind.as_str(), "group" | "supergroup"),
            from_self: from.id == self.bot.id,
            content,
            mentions,
            quoted_author: msg
                .reply_to_message
                .as_ref()
                .and_then(|r| r.from.as_ref())
                .map(|u| u.id.to_string()),
            display_name,
        })
    }

    /// Resolve a mention entity to an author key
    ///
    /// `@username` mentions only resolve for the bot itself; other usernames
    /// are kept verbatim.
    fn mention_key(&self, text: &str, entity: &Entity) -> Option<String> {
        match entity.kind.as_str() {
            "text_mention" => entity.user.as_ref().map(|u| u.id.to_string()),
            "mention" => {
                let mention = utf16_slice(text, entity.offset, entity.length)?;
                let handle = mention.trim_start_matches('@');
                match &self.bot.username {
                    Some(own) if own.eq_ignore_ascii_case(handle) => Some(self.bot.key.clone()),
                    _ => Some(handle.to_string()),
                }
            }
            _ => None,
        }
    }

    fn reply_to(quoted: &Option<String>) -> Option<i64> {
        quoted.as_deref().and_then(|id| id.parse().ok())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    fn self_key(&self) -> &str {
        &self.bot.key
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
        let reply_to = Self::reply_to(&message.quoted_event_id);
        let chat_id = message.conversation.as_str().to_string();

        match message.payload {
            Payload::Text(text) => {
                let mut text = scrub(&text);
                if text.chars().count() > MAX_MESSAGE_CHARS {
                    text = text.chars().take(MAX_MESSAGE_CHARS).collect();
                }

                let mut body = json!({ "chat_id": chat_id, "text": text });
                if let Some(id) = reply_to {
                    body["reply_to_message_id"] = json!(id);
                    body["allow_sending_without_reply"] = json!(true);
                }
                let _: serde_json::Value = self.call("sendMessage", body).await?;
            }
            Payload::Voice(note) => {
                let part = Part::bytes(note.bytes)
                    .file_name("voice.ogg")
                    .mime_str("audio/ogg")
                    .map_err(|e| transport_err("sendVoice", e))?;
                let mut form = Form::new().text("chat_id", chat_id).part("voice", part);
                if let Some(id) = reply_to {
                    form = form
                        .text("reply_to_message_id", id.to_string())
                        .text("allow_sending_without_reply", "true");
                }

                let response = self
                    .client
                    .post(self.api_url("sendVoice"))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| transport_err("sendVoice", e))?;
                let _: serde_json::Value = Self::unwrap_response("sendVoice", response).await?;
            }
        }

        Ok(())
    }

    async fn presence(
        &self,
        conversation: &ConversationKey,
        presence: Presence,
    ) -> Result<(), EngineError> {
        let action = match presence {
            Presence::Typing => "typing",
            Presence::Recording => "record_voice",
        };
        let _: bool = self
            .call(
                "sendChatAction",
                json!({ "chat_id": conversation.as_str(), "action": action }),
            )
            .await?;
        Ok(())
    }

    async fn download_image(&self, reference: &str) -> Result<Vec<u8>, EngineError> {
        let file: TgFile = self.call("getFile", json!({ "file_id": reference })).await?;
        let path = file
            .file_path
            .ok_or_else(|| EngineError::Transport("getFile returned no file_path".to_string()))?;

        let url = format!("{}/file/bot{}/{}", self.base_url, self.token.expose(), path);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_err("download", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "download failed ({})",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_err("download", e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(allowed: Vec<i64>) -> TelegramTransport {
        let config = TelegramConfig {
            allowed_users: allowed,
            ..TelegramConfig::default()
        };
        TelegramTransport::with_identity(
            &config,
            SecretString::new("123:abc"),
            999,
            Some("MohiniBot".to_string()),
        )
    }

    fn parse(value: serde_json::Value) -> TgMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_direct_text_message() {
        let msg = parse(json!({
            "message_id": 7,
            "chat": { "id": 42, "type": "private" },
            "from": { "id": 42, "first_name": "Zoya", "last_name": "K" },
            "text": "hii"
        }));

        let event = transport(vec![]).to_event(msg).unwrap();
        assert_eq!(event.id, "7");
        assert_eq!(event.conversation.as_str(), "42");
        assert!(!event.is_group);
        assert!(!event.from_self);
        assert_eq!(event.text(), Some("hii"));
        assert_eq!(event.display_name.as_deref(), Some("Zoya K"));
    }

    #[test]
    fn test_group_mention_and_reply() {
        // "héllo" has one non-ASCII char; offsets are UTF-16 units
        let msg = parse(json!({
            "message_id": 8,
            "chat": { "id": -100, "type": "supergroup" },
            "from": { "id": 5, "first_name": "Ravi" },
            "text": "héllo @mohinibot and @someone",
            "entities": [
                { "type": "mention", "offset": 6, "length": 10 },
                { "type": "mention", "offset": 21, "length": 8 }
            ],
            "reply_to_message": {
                "message_id": 3,
                "chat": { "id": -100, "type": "supergroup" },
                "from": { "id": 999, "first_name": "Mohini" }
            }
        }));

        let t = transport(vec![]);
        let event = t.to_event(msg).unwrap();
        assert!(event.is_group);
        assert_eq!(event.author, "5");
        assert_eq!(event.mentions, vec!["999".to_string(), "someone".to_string()]);
        assert_eq!(event.quoted_author.as_deref(), Some(t.self_key()));
    }

    #[test]
    fn test_photo_without_caption_is_image() {
        let msg = parse(json!({
            "message_id": 9,
            "chat": { "id": 42, "type": "private" },
            "from": { "id": 42, "first_name": "Zoya" },
            "photo": [{ "file_id": "small" }, { "file_id": "large" }]
        }));

        let event = transport(vec![]).to_event(msg).unwrap();
        assert_eq!(
            event.content,
            InboundContent::Image {
                reference: "large".to_string()
            }
        );
    }

    #[test]
    fn test_caption_wins_over_photo() {
        let msg = parse(json!({
            "message_id": 10,
            "chat": { "id": 42, "type": "private" },
            "from": { "id": 42, "first_name": "Zoya" },
            "caption": "look at this",
            "photo": [{ "file_id": "large" }]
        }));

        let event = transport(vec![]).to_event(msg).unwrap();
        assert_eq!(event.text(), Some("look at this"));
    }

    #[test]
    fn test_allowed_users_filter() {
        let msg = parse(json!({
            "message_id": 11,
            "chat": { "id": 42, "type": "private" },
            "from": { "id": 42, "first_name": "Zoya" },
            "text": "hi"
        }));
        assert!(transport(vec![1, 2]).to_event(msg).is_none());
    }

    #[test]
    fn test_utf16_slice() {
        assert_eq!(utf16_slice("a😀b@x", 3, 2).as_deref(), Some("b@"));
        assert_eq!(utf16_slice("abc", 2, 5), None);
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", transport(vec![]));
        assert!(!rendered.contains("123:abc"));
    }
}
