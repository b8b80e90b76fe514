//! Google Translate speech endpoint
//!
//! Keyless and limited to short clips; returns MP3.

use async_trait::async_trait;

use super::{AudioFormat, SpeechError, SpeechSynthesizer, SynthesizedAudio};
use crate::config::SpeechConfig;

/// The endpoint rejects longer text
const TRANSLATE_MAX_CHARS: usize = 200;

pub struct TranslateSpeech {
    base_url: String,
    language: String,
    client: reqwest::Client,
}

impl TranslateSpeech {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            base_url: config.translate_base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for TranslateSpeech {
    fn name(&self) -> &str {
        "google_translate"
    }

    fn max_chars(&self) -> Option<usize> {
        Some(TRANSLATE_MAX_CHARS)
    }

    // The endpoint has a single voice per language
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<SynthesizedAudio, SpeechError> {
        let response = self
            .client
            .get(format!("{}/translate_tts", self.base_url))
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", self.language.as_str()),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(SpeechError::Synthesis(format!(
                "Translate TTS error ({})",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Synthesis(e.without_url().to_string()))?;

        Ok(SynthesizedAudio::Encoded {
            bytes: bytes.to_vec(),
            format: AudioFormat::Mp3,
        })
    }
}
