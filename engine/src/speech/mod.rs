//! Voice-note pipeline
//!
//! A reply becomes a voice note in three steps, each of which may fail on its own:
//!
//! 1. [`SpeechSynthesizer`] turns sanitized text into audio (raw PCM or an encoded clip)
//! 2. [`Transcoder`] turns anything that isn't already OGG/Opus into a voice note
//! 3. the bytes are handed back as a [`VoiceNote`]
//!
//! Intermediate files belong to the transcoder and are removed on every path.
//! [`SpeechPipeline::render`] never panics past its boundary; the caller
//! falls back to a text reply on any [`SpeechError`].

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;

pub mod ffmpeg;
pub mod gemini;
pub mod translate;

pub use ffmpeg::FfmpegTranscoder;
pub use gemini::GeminiSpeech;
pub use translate::TranslateSpeech;

/// MIME type of every voice note the pipeline produces
pub const VOICE_NOTE_MIME: &str = "audio/ogg; codecs=opus";

/// Errors raised inside the speech pipeline
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Provider returned no audio")]
    NoAudio,

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("Nothing to say after sanitizing")]
    EmptyText,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SpeechError> for EngineError {
    fn from(e: SpeechError) -> Self {
        match e {
            SpeechError::Transcode(msg) => EngineError::Transcode(msg),
            SpeechError::Timeout { stage, secs } => EngineError::Timeout {
                operation: stage.to_string(),
                secs,
            },
            SpeechError::Io(io) => EngineError::Io(io),
            other => EngineError::SpeechSynthesis(crate::secrets::scrub(&other.to_string())),
        }
    }
}

/// Container of an encoded clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    OggOpus,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::OggOpus => "ogg",
        }
    }
}

/// Audio as returned by a synthesis provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesizedAudio {
    /// Signed 16-bit little-endian samples
    Pcm {
        samples: Vec<u8>,
        sample_rate: u32,
        channels: u16,
    },
    Encoded {
        bytes: Vec<u8>,
        format: AudioFormat,
    },
}

impl SynthesizedAudio {
    pub fn is_empty(&self) -> bool {
        match self {
            SynthesizedAudio::Pcm { samples, .. } => samples.is_empty(),
            SynthesizedAudio::Encoded { bytes, .. } => bytes.is_empty(),
        }
    }
}

/// A playable OGG/Opus voice note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceNote {
    pub bytes: Vec<u8>,
}

impl VoiceNote {
    pub fn mime_type(&self) -> &'static str {
        VOICE_NOTE_MIME
    }
}

/// Text-to-speech provider
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Maximum characters the provider accepts per request, if limited
    fn max_chars(&self) -> Option<usize> {
        None
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesizedAudio, SpeechError>;
}

/// Converts provider audio into an OGG/Opus voice note
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn to_voice_note(&self, audio: SynthesizedAudio) -> Result<Vec<u8>, SpeechError>;

    /// Whether the transcoder binary is usable
    async fn check_health(&self) -> bool {
        true
    }
}

/// Strip chat markup and collapse whitespace
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '~' | '`'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Limit `text` to `max_chars`, cutting at a word boundary when one is near
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let head: String = text.chars().take(max_chars).collect();
    match head.rfind(char::is_whitespace) {
        Some(at) if at > head.len() / 2 => head[..at].trim_end().to_string(),
        _ => head,
    }
}

async fn with_deadline<T, F>(stage: &'static str, limit: Duration, fut: F) -> Result<T, SpeechError>
where
    F: Future<Output = Result<T, SpeechError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SpeechError::Timeout {
            stage,
            secs: limit.as_secs(),
        })?
}

/// Synthesis plus transcoding with per-stage deadlines
pub struct SpeechPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    transcoder: Arc<dyn Transcoder>,
    voice: String,
    max_chars: usize,
    timeout: Duration,
}

impl SpeechPipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        transcoder: Arc<dyn Transcoder>,
        voice: impl Into<String>,
        max_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            synthesizer,
            transcoder,
            voice: voice.into(),
            max_chars,
            timeout,
        }
    }

    /// Pipeline for the configured provider, transcoding under `temp_dir`
    pub fn from_config(
        config: &SpeechConfig,
        temp_dir: &Path,
        secrets: crate::secrets::SecretCache,
    ) -> Self {
        let synthesizer: Arc<dyn SpeechSynthesizer> = match config.provider.as_str() {
            "google_translate" => Arc::new(TranslateSpeech::new(config)),
            _ => Arc::new(GeminiSpeech::new(config, secrets)),
        };
        let transcoder = Arc::new(FfmpegTranscoder::new(
            config.ffmpeg.clone(),
            config.bitrate.clone(),
            temp_dir,
        ));

        Self::new(
            synthesizer,
            transcoder,
            config.voice.clone(),
            config.max_chars,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    pub async fn check_health(&self) -> bool {
        self.transcoder.check_health().await
    }

    /// Render `text` as a voice note
    pub async fn render(&self, text: &str) -> Result<VoiceNote, SpeechError> {
        let limit = self
            .synthesizer
            .max_chars()
            .map_or(self.max_chars, |m| m.min(self.max_chars));
        let text = clip(&sanitize(text), limit);
        if text.is_empty() {
            return Err(SpeechError::EmptyText);
        }

        let audio = with_deadline(
            "speech synthesis",
            self.timeout,
            self.synthesizer.synthesize(&text, &self.voice),
        )
        .await?;

        if audio.is_empty() {
            return Err(SpeechError::NoAudio);
        }

        let bytes = match audio {
            SynthesizedAudio::Encoded {
                bytes,
                format: AudioFormat::OggOpus,
            } => bytes,
            other => {
                with_deadline("transcoding", self.timeout, self.transcoder.to_voice_note(other))
                    .await?
            }
        };

        if bytes.is_empty() {
            return Err(SpeechError::NoAudio);
        }

        debug!(
            provider = self.synthesizer.name(),
            chars = text.chars().count(),
            bytes = bytes.len(),
            "Voice note rendered"
        );
        Ok(VoiceNote { bytes })
    }
}

/// Delete files in `dir` whose modification time is older than `max_age`
///
/// Returns the number of files removed. A missing directory removes nothing.
pub async fn sweep_stale(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let path = entry.path();
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove stale artifact {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}

/// Run [`sweep_stale`] every `interval` until `shutdown` flips to `true`
pub fn spawn_sweeper(
    dir: PathBuf,
    interval: Duration,
    max_age: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep_stale(&dir, max_age).await {
                        Ok(0) => {}
                        Ok(n) => info!("Removed {} stale speech artifacts", n),
                        Err(e) => warn!("Speech artifact sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
