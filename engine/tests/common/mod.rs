//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use sakhi_engine::agent::{OrchestratorSettings, ReplyOrchestrator};
use sakhi_engine::llm::{GenerationOptions, LLMError, LLMProvider, Message};
use sakhi_engine::memory::{ConversationKey, FileMemoryStore};
use sakhi_engine::modality::ModalityPolicy;
use sakhi_engine::mood::{Mood, MoodProcess};
use sakhi_engine::ocr::OcrProvider;
use sakhi_engine::speech::{
    AudioFormat, SpeechError, SpeechPipeline, SpeechSynthesizer, SynthesizedAudio, Transcoder,
};
use sakhi_engine::transport::{
    InboundContent, InboundEvent, OutboundMessage, Payload, Presence, Transport,
};
use sdk::errors::EngineError;

pub const BOT_KEY: &str = "999";

/// LLM that replays queued replies, then a default
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LLMError>>>,
    default_reply: String,
    delay: Duration,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(default_reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.to_string(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(default_reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(default_reply)
        }
    }

    pub fn push(&self, reply: Result<String, LLMError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<String, LLMError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}

/// Transport that records everything sent through it
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub presence: Mutex<Vec<Presence>>,
    pub image: Vec<u8>,
    pub reject_voice: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m.payload {
                Payload::Text(text) => Some(text),
                Payload::Voice(_) => None,
            })
            .collect()
    }

    pub fn voice_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m.payload, Payload::Voice(_)))
            .count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn self_key(&self) -> &str {
        BOT_KEY
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), EngineError> {
        if self.reject_voice && matches!(message.payload, Payload::Voice(_)) {
            return Err(EngineError::Transport("voice rejected".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn presence(
        &self,
        _conversation: &ConversationKey,
        presence: Presence,
    ) -> Result<(), EngineError> {
        self.presence.lock().unwrap().push(presence);
        Ok(())
    }

    async fn download_image(&self, _reference: &str) -> Result<Vec<u8>, EngineError> {
        Ok(self.image.clone())
    }
}

/// OCR that always reads the same text
pub struct FixedOcr(pub String);

#[async_trait]
impl OcrProvider for FixedOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<String, EngineError> {
        Ok(self.0.clone())
    }
}

/// Synthesizer returning a ready OGG clip, or failing
pub struct FakeSynth {
    pub fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    fn name(&self) -> &str {
        "fake"
    }

    async fn synthesize(&self, _text: &str, _voice: &str) -> Result<SynthesizedAudio, SpeechError> {
        if self.fail {
            return Err(SpeechError::Synthesis("quota exhausted".to_string()));
        }
        Ok(SynthesizedAudio::Encoded {
            bytes: b"OggS-fake".to_vec(),
            format: AudioFormat::OggOpus,
        })
    }
}

pub struct PassthroughTranscoder;

#[async_trait]
impl Transcoder for PassthroughTranscoder {
    async fn to_voice_note(&self, audio: SynthesizedAudio) -> Result<Vec<u8>, SpeechError> {
        match audio {
            SynthesizedAudio::Pcm { samples, .. } => Ok(samples),
            SynthesizedAudio::Encoded { bytes, .. } => Ok(bytes),
        }
    }
}

pub fn speech(fail: bool) -> Arc<SpeechPipeline> {
    Arc::new(SpeechPipeline::new(
        Arc::new(FakeSynth { fail }),
        Arc::new(PassthroughTranscoder),
        "Leda",
        200,
        Duration::from_secs(2),
    ))
}

/// Policy that picks voice whenever the guard and length rules allow
pub fn always_voice() -> ModalityPolicy {
    ModalityPolicy {
        lively_voice: 1.0,
        quiet_voice: 1.0,
        short_voice: 1.0,
        medium_voice: 1.0,
        ..ModalityPolicy::default()
    }
}

pub fn never_voice() -> ModalityPolicy {
    ModalityPolicy {
        lively_voice: 0.0,
        quiet_voice: 0.0,
        short_voice: 0.0,
        medium_voice: 0.0,
        ..ModalityPolicy::default()
    }
}

/// Mood pinned for the length of a test
pub fn pinned_mood(mood: Mood) -> Arc<MoodProcess> {
    Arc::new(MoodProcess::starting_at(
        mood,
        Instant::now(),
        Duration::from_secs(3600),
        Duration::from_secs(7200),
    ))
}

pub struct Harness {
    pub store: Arc<FileMemoryStore>,
    pub llm: Arc<ScriptedLlm>,
    pub transport: Arc<RecordingTransport>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(llm: ScriptedLlm) -> Self {
        Self::with_transport(llm, RecordingTransport::new()).await
    }

    pub async fn with_transport(llm: ScriptedLlm, transport: RecordingTransport) -> Self {
        let dir = TempDir::new().unwrap();
        let store = FileMemoryStore::open(&dir.path().join("memory"), &dir.path().join("trash"))
            .await
            .unwrap();
        Self {
            store: Arc::new(store),
            llm: Arc::new(llm),
            transport: Arc::new(transport),
            dir,
        }
    }

    pub fn orchestrator(&self, settings: OrchestratorSettings) -> ReplyOrchestrator {
        ReplyOrchestrator::new(
            settings,
            self.store.clone(),
            self.llm.clone(),
            self.transport.clone(),
        )
        .with_policy(never_voice())
        .with_mood(pinned_mood(Mood::Normal))
    }
}

pub fn direct(conversation: &str, text: &str, display_name: Option<&str>) -> InboundEvent {
    let mut event = InboundEvent::direct_text(conversation, text);
    event.display_name = display_name.map(str::to_string);
    event
}

pub fn group(text: &str) -> InboundEvent {
    InboundEvent {
        id: "77".to_string(),
        conversation: ConversationKey::new("-100"),
        author: "5".to_string(),
        is_group: true,
        from_self: false,
        content: InboundContent::Text(text.to_string()),
        mentions: Vec::new(),
        quoted_author: None,
        display_name: Some("Ravi".to_string()),
    }
}
