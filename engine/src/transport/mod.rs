//! Messaging transport contract
//!
//! A transport feeds [`InboundEvent`]s into the dispatcher queue and accepts
//! [`OutboundMessage`]s from the orchestrator. Identifiers are opaque strings
//! so the same core runs behind any chat network.

use async_trait::async_trait;
use sdk::errors::EngineError;

use crate::memory::ConversationKey;
use crate::speech::VoiceNote;

pub mod telegram;

pub use telegram::TelegramTransport;

/// Conversation key of the status broadcast channel; never answered
pub const BROADCAST_KEY: &str = "status@broadcast";

/// What an inbound event carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    /// Image without a caption; `reference` is resolved through [`Transport::download_image`]
    Image { reference: String },
    /// Stickers, locations, joins and the like
    Empty,
}

/// One message received from the network
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Transport-specific message id, used for quoting the reply
    pub id: String,
    /// Chat the event belongs to (a user or a group)
    pub conversation: ConversationKey,
    /// Who wrote it; equals the conversation key in direct chats
    pub author: String,
    pub is_group: bool,
    pub from_self: bool,
    pub content: InboundContent,
    /// Author keys mentioned in the message
    pub mentions: Vec<String>,
    /// Author of the message this one replies to
    pub quoted_author: Option<String>,
    pub display_name: Option<String>,
}

impl InboundEvent {
    /// Direct text message, mostly useful for tests and the CLI
    pub fn direct_text(conversation: &str, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation: ConversationKey::new(conversation),
            author: conversation.to_string(),
            is_group: false,
            from_self: false,
            content: InboundContent::Text(text.into()),
            mentions: Vec::new(),
            quoted_author: None,
            display_name: None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            InboundContent::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Outbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Voice(VoiceNote),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub conversation: ConversationKey,
    pub payload: Payload,
    pub quoted_event_id: Option<String>,
}

impl OutboundMessage {
    pub fn text(conversation: ConversationKey, text: impl Into<String>) -> Self {
        Self {
            conversation,
            payload: Payload::Text(text.into()),
            quoted_event_id: None,
        }
    }

    pub fn quoting(mut self, event_id: &str) -> Self {
        self.quoted_event_id = Some(event_id.to_string());
        self
    }
}

/// Presence hint shown to the counterpart while a reply is prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Typing,
    Recording,
}

/// Chat network adapter
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Author key of the bot account itself
    fn self_key(&self) -> &str;

    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError>;

    async fn presence(
        &self,
        conversation: &ConversationKey,
        presence: Presence,
    ) -> Result<(), EngineError>;

    async fn download_image(&self, reference: &str) -> Result<Vec<u8>, EngineError>;
}
