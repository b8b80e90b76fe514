//! Gemini speech generation
//!
//! Uses the `generateContent` endpoint with `responseModalities: ["AUDIO"]`.
//! The reply carries base64 16-bit mono PCM in `inlineData`.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::json;

use super::{SpeechError, SpeechSynthesizer, SynthesizedAudio};
use crate::config::SpeechConfig;
use crate::secrets::{SecretCache, GEMINI_API_KEY};

const STYLE_PREFIX: &str = "Say in a warm and friendly tone:";

pub struct GeminiSpeech {
    base_url: String,
    model: String,
    sample_rate: u32,
    secret_cache: SecretCache,
    client: reqwest::Client,
}

impl GeminiSpeech {
    pub fn new(config: &SpeechConfig, secret_cache: SecretCache) -> Self {
        Self {
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            sample_rate: config.sample_rate,
            secret_cache,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(text: &str, voice: &str) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [{ "text": format!("{} {}", STYLE_PREFIX, text) }]
            }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice }
                    }
                }
            }
        })
    }

    fn extract_audio(data: &serde_json::Value) -> Result<Vec<u8>, SpeechError> {
        let encoded = data
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .and_then(|parts| {
                parts.iter().find_map(|part| {
                    part.pointer("/inlineData/data").and_then(|d| d.as_str())
                })
            })
            .ok_or(SpeechError::NoAudio)?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SpeechError::Synthesis(format!("Invalid audio payload: {}", e)))
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiSpeech {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesizedAudio, SpeechError> {
        let api_key = self
            .secret_cache
            .get_secret(GEMINI_API_KEY)
            .map_err(|e| SpeechError::Synthesis(e.to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        tracing::debug!("Gemini TTS request: model={}, voice={}", self.model, voice);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.expose())])
            .json(&Self::build_payload(text, voice))
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Synthesis(format!(
                "Gemini TTS error ({}): {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SpeechError::Synthesis(e.without_url().to_string()))?;

        Ok(SynthesizedAudio::Pcm {
            samples: Self::extract_audio(&data)?,
            sample_rate: self.sample_rate,
            channels: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_requests_audio() {
        let payload = GeminiSpeech::build_payload("hii", "Leda");
        assert_eq!(payload["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            payload["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Leda"
        );
        assert!(payload["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .ends_with("hii"));
    }

    #[test]
    fn test_extract_audio() {
        let data = json!({
            "candidates": [{
                "content": { "parts": [{ "inlineData": { "mimeType": "audio/L16", "data": "AAEC" } }] }
            }]
        });
        assert_eq!(GeminiSpeech::extract_audio(&data).unwrap(), vec![0, 1, 2]);

        let empty = json!({ "candidates": [{ "content": { "parts": [{ "text": "no" }] } }] });
        assert!(matches!(
            GeminiSpeech::extract_audio(&empty),
            Err(SpeechError::NoAudio)
        ));
    }
}
