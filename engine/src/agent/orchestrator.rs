//! Reply Orchestrator
//!
//! Drives one inbound event from arrival to dispatch:
//!
//! 1. filter self-authored, broadcast and content-less events
//! 2. extract text, running OCR for image-only messages
//! 3. intercept `reset` / `mood` / `help`
//! 4. gate group messages on mention, reply-to-bot or the bot's name
//! 5. annotate group messages with the author
//! 6. update memory and ask the model for a reply
//! 7. pick text or voice, render, dispatch, and finalize the pending turn
//!
//! [`ReplyOrchestrator::handle`] is the error boundary for a turn: nothing a
//! collaborator raises escapes it, and every user-visible failure is an
//! in-persona message.

use sdk::errors::{EngineError, ErrorExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::persona::{self, Command};
use super::stats::{InMemoryStats, StatsSink};
use crate::config::Config;
use crate::llm::{context_messages, GenerationOptions, LLMProvider};
use crate::memory::{Conversation, ConversationKey, MemoryStore, Modality, Turn};
use crate::modality::{is_voice_requested, ModalityPolicy};
use crate::mood::MoodProcess;
use crate::ocr::OcrProvider;
use crate::profile::{record_name, NameExtractor, PatternNameExtractor};
use crate::speech::SpeechPipeline;
use crate::transport::{
    InboundContent, InboundEvent, OutboundMessage, Payload, Presence, Transport, BROADCAST_KEY,
};

/// Why an event produced no reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    FromSelf,
    Broadcast,
    NoContent,
    NotAddressed,
}

/// What happened to an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Ignored(IgnoreReason),
    Command(Command),
    /// Malformed command answered with a clarification
    Clarified,
    /// First contact answered with a greeting
    Greeted,
    /// Model reply delivered with the given modality
    Replied(Modality),
    /// Model call failed; an in-persona error reply was sent as text
    Failed,
}

/// Static knobs for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub bot_name: String,
    pub aliases: Vec<String>,
    pub fallback_name: String,
    pub system_prompt: String,
    pub history_cap: usize,
    pub max_input_chars: usize,
    pub max_reply_chars: usize,
    pub llm_timeout: Duration,
    pub generation: GenerationOptions,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bot_name: config.persona.name.clone(),
            aliases: config.persona.aliases.clone(),
            fallback_name: config.persona.fallback_name.clone(),
            system_prompt: config.persona.system_prompt.clone(),
            history_cap: config.memory.history_cap,
            max_input_chars: config.memory.max_input_chars,
            max_reply_chars: config.memory.max_reply_chars,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            generation: GenerationOptions::from(&config.llm),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default_config())
    }
}

pub struct ReplyOrchestrator {
    settings: OrchestratorSettings,
    store: Arc<dyn MemoryStore>,
    llm: Arc<dyn LLMProvider>,
    transport: Arc<dyn Transport>,
    ocr: Option<Arc<dyn OcrProvider>>,
    speech: Option<Arc<SpeechPipeline>>,
    mood: Arc<MoodProcess>,
    names: Arc<dyn NameExtractor>,
    policy: ModalityPolicy,
    stats: Arc<dyn StatsSink>,
}

impl ReplyOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        store: Arc<dyn MemoryStore>,
        llm: Arc<dyn LLMProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            settings,
            store,
            llm,
            transport,
            ocr: None,
            speech: None,
            mood: Arc::new(MoodProcess::new()),
            names: Arc::new(PatternNameExtractor::new()),
            policy: ModalityPolicy::default(),
            stats: Arc::new(InMemoryStats::new()),
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Without a pipeline every reply goes out as text
    pub fn with_speech(mut self, speech: Arc<SpeechPipeline>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_mood(mut self, mood: Arc<MoodProcess>) -> Self {
        self.mood = mood;
        self
    }

    pub fn with_name_extractor(mut self, names: Arc<dyn NameExtractor>) -> Self {
        self.names = names;
        self
    }

    pub fn with_policy(mut self, policy: ModalityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn mood(&self) -> &Arc<MoodProcess> {
        &self.mood
    }

    /// Process one inbound event to completion
    pub async fn handle(&self, event: InboundEvent) -> TurnOutcome {
        if event.from_self {
            return TurnOutcome::Ignored(IgnoreReason::FromSelf);
        }
        if event.conversation.as_str() == BROADCAST_KEY {
            return TurnOutcome::Ignored(IgnoreReason::Broadcast);
        }

        let Some(text) = self.extract_text(&event).await else {
            return TurnOutcome::Ignored(IgnoreReason::NoContent);
        };

        let eligible = self.is_addressed(&event, &text);

        match Command::parse(&text) {
            Ok(Some(command)) => return self.run_command(&event, command).await,
            Ok(None) => {}
            Err(e) => {
                // Other bots' commands in groups are none of our business
                if !eligible {
                    return TurnOutcome::Ignored(IgnoreReason::NotAddressed);
                }
                debug!(class = ?e.class(), "{}", e);
                self.send_text(&event, persona::UNKNOWN_COMMAND).await;
                return TurnOutcome::Clarified;
            }
        }

        if !eligible {
            debug!(conversation = %event.conversation, "Group message not addressed to us");
            return TurnOutcome::Ignored(IgnoreReason::NotAddressed);
        }

        let display_name = event
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.settings.fallback_name.clone());
        self.stats.record(&event.conversation, &display_name);

        self.reply(&event, &text, &display_name).await
    }

    async fn extract_text(&self, event: &InboundEvent) -> Option<String> {
        match &event.content {
            InboundContent::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            InboundContent::Image { reference } => {
                let recognized = self.recognize(reference).await;
                if recognized.trim().is_empty() {
                    Some(persona::OCR_PLACEHOLDER.to_string())
                } else {
                    Some(recognized.trim().to_string())
                }
            }
            InboundContent::Empty => None,
        }
    }

    async fn recognize(&self, reference: &str) -> String {
        let Some(ocr) = &self.ocr else {
            return String::new();
        };

        match self.transport.download_image(reference).await {
            Ok(image) => ocr.recognize_or_empty(&image).await,
            Err(e) => {
                warn!("Image download failed: {}", e);
                String::new()
            }
        }
    }

    /// Direct chats always; groups on mention, reply-to-bot, or the bot's name
    fn is_addressed(&self, event: &InboundEvent, text: &str) -> bool {
        if !event.is_group {
            return true;
        }

        let own = self.transport.self_key();
        if event.mentions.iter().any(|m| m == own) {
            return true;
        }
        if event.quoted_author.as_deref() == Some(own) {
            return true;
        }

        let lowered = text.to_lowercase();
        std::iter::once(&self.settings.bot_name)
            .chain(self.settings.aliases.iter())
            .filter(|name| !name.is_empty())
            .any(|name| lowered.contains(&name.to_lowercase()))
    }

    async fn run_command(&self, event: &InboundEvent, command: Command) -> TurnOutcome {
        info!(conversation = %event.conversation, ?command, "Command received");

        let reply = match command {
            Command::Reset => {
                let _guard = self.store.lock(&event.conversation).await;
                match self.store.archive_and_clear(&event.conversation).await {
                    Ok(record) => {
                        info!(
                            conversation = %event.conversation,
                            archived = record.memory.len(),
                            "Conversation reset"
                        );
                        persona::RESET_CONFIRMATION.to_string()
                    }
                    Err(e) => {
                        error!(conversation = %event.conversation, "Reset failed: {}", e);
                        persona::RESET_FAILED.to_string()
                    }
                }
            }
            Command::Mood => persona::mood_report(self.mood.consult()),
            Command::Help => persona::help_text(&self.settings.bot_name),
        };

        self.send_text(event, &reply).await;
        TurnOutcome::Command(command)
    }

    fn annotate(&self, event: &InboundEvent, text: &str, display_name: &str) -> String {
        if !event.is_group {
            return text.to_string();
        }
        let short_author = event.author.split('@').next().unwrap_or(&event.author);
        format!("<{}><{}>: {}", short_author, display_name, text)
    }

    async fn reply(&self, event: &InboundEvent, text: &str, display_name: &str) -> TurnOutcome {
        let key = &event.conversation;
        let _guard = self.store.lock(key).await;
        let mut conversation = self.store.load(key).await;

        let known_profile = conversation.profile();
        let captured = match known_profile {
            None if !event.is_group => self.names.extract(text, None),
            _ => None,
        };

        let anonymous = display_name == self.settings.fallback_name;
        if conversation.is_empty() && captured.is_none() && anonymous {
            return self.greet(event, &mut conversation).await;
        }

        let user_name = known_profile
            .map(|p| p.name)
            .or_else(|| (!anonymous && !event.is_group).then(|| display_name.to_string()));
        conversation.ensure_system(persona::render_system_prompt(
            &self.settings.system_prompt,
            &self.settings.bot_name,
            user_name.as_deref(),
        ));

        if let Some(name) = &captured {
            if record_name(&mut conversation, name) {
                info!(conversation = %key, name = %name, "Learned counterpart's name");
            }
        }

        let annotated = self.annotate(event, text, display_name);
        conversation.push(Turn::user(persona::truncate_input(
            &annotated,
            self.settings.max_input_chars,
        )));
        conversation.prune(self.settings.history_cap);

        self.hint(key, Presence::Typing).await;

        let reply = match self.generate(&conversation).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(conversation = %key, class = ?e.class(), "Reply generation failed: {}", e);
                let fallback = persona::error_reply(&mut rand::thread_rng());
                conversation.push(Turn::assistant(fallback.clone(), Modality::Text));
                conversation.prune(self.settings.history_cap);
                self.persist(key, &conversation).await;
                self.send_text(event, &fallback).await;
                return TurnOutcome::Failed;
            }
        };

        let reply = match &captured {
            Some(name) => persona::name_acknowledgment(name, &mut rand::thread_rng()),
            None if reply.is_empty() => persona::empty_reply(&mut rand::thread_rng()),
            None => persona::cap_reply(&reply, self.settings.max_reply_chars),
        };

        conversation.push(Turn::assistant(reply.clone(), Modality::Pending));
        conversation.prune(self.settings.history_cap);
        self.persist(key, &conversation).await;

        let chosen = self.choose_modality(&reply, &conversation, text);
        let sent = self.dispatch(event, &reply, chosen).await;

        conversation.resolve_pending(sent);
        self.persist(key, &conversation).await;

        debug!(conversation = %key, %sent, turns = conversation.len(), "Turn complete");
        TurnOutcome::Replied(sent)
    }

    async fn greet(&self, event: &InboundEvent, conversation: &mut Conversation) -> TurnOutcome {
        let greeting = persona::greeting(&self.settings.bot_name, &mut rand::thread_rng());

        conversation.ensure_system(persona::render_system_prompt(
            &self.settings.system_prompt,
            &self.settings.bot_name,
            None,
        ));
        conversation.push(Turn::assistant(greeting.clone(), Modality::Text));
        self.persist(&event.conversation, conversation).await;

        info!(conversation = %event.conversation, "Greeting new contact");
        self.send_text(event, &greeting).await;
        TurnOutcome::Greeted
    }

    async fn generate(&self, conversation: &Conversation) -> Result<String, EngineError> {
        let messages = context_messages(conversation);
        let limit = self.settings.llm_timeout;

        let reply = tokio::time::timeout(
            limit,
            self.llm.generate(&messages, &self.settings.generation),
        )
        .await
        .map_err(|_| EngineError::Timeout {
            operation: format!("{} completion", self.llm.name()),
            secs: limit.as_secs(),
        })??;

        Ok(reply.trim().to_string())
    }

    fn choose_modality(&self, reply: &str, conversation: &Conversation, text: &str) -> Modality {
        // The mood timer only advances when consulted, so do it every turn
        let mood = self.mood.consult();
        if self.speech.is_none() {
            return Modality::Text;
        }

        self.policy.decide(
            reply.chars().count(),
            conversation,
            is_voice_requested(text),
            mood,
            &mut rand::thread_rng(),
        )
    }

    /// Send `reply` as `chosen`, falling back to text; returns what was sent
    async fn dispatch(&self, event: &InboundEvent, reply: &str, chosen: Modality) -> Modality {
        if chosen == Modality::Voice {
            if let Some(speech) = &self.speech {
                self.hint(&event.conversation, Presence::Recording).await;

                match speech.render(reply).await {
                    Ok(note) => {
                        let message = OutboundMessage {
                            conversation: event.conversation.clone(),
                            payload: Payload::Voice(note),
                            quoted_event_id: Some(event.id.clone()),
                        };
                        match self.transport.send(message).await {
                            Ok(()) => return Modality::Voice,
                            Err(e) => warn!("Voice note delivery failed, sending text: {}", e),
                        }
                    }
                    Err(e) => {
                        let e = EngineError::from(e);
                        warn!(class = ?e.class(), "Voice rendering failed, sending text: {}", e);
                    }
                }
            }
        }

        self.send_text(event, reply).await;
        Modality::Text
    }

    async fn send_text(&self, event: &InboundEvent, text: &str) -> bool {
        let message =
            OutboundMessage::text(event.conversation.clone(), text).quoting(&event.id);
        match self.transport.send(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(conversation = %event.conversation, "Failed to send reply: {}", e);
                false
            }
        }
    }

    async fn hint(&self, key: &ConversationKey, presence: Presence) {
        if let Err(e) = self.transport.presence(key, presence).await {
            debug!("Presence hint failed: {}", e);
        }
    }

    async fn persist(&self, key: &ConversationKey, conversation: &Conversation) {
        if let Err(e) = self.store.save(key, conversation).await {
            error!(conversation = %key, hint = e.user_hint(), "Failed to save memory: {}", e);
        }
    }
}
