use super::{GenerationOptions, LLMError, LLMProvider, Message, MessageRole};
use crate::config::GeminiConfig;
use crate::secrets::{SecretCache, GEMINI_API_KEY};
use async_trait::async_trait;
use serde_json::json;

pub struct GeminiProvider {
    config: GeminiConfig,
    secret_cache: SecretCache,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig, secret_cache: SecretCache) -> Self {
        Self {
            config,
            secret_cache,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(messages: &[Message], options: &GenerationOptions) -> serde_json::Value {
        let mut contents = Vec::new();
        let mut system_instruction = None;

        for msg in messages {
            if msg.role == MessageRole::System {
                system_instruction = Some(json!({
                    "parts": [{"text": msg.content}]
                }));
                continue;
            }

            contents.push(json!({
                "role": if msg.role == MessageRole::Assistant { "model" } else { "user" },
                "parts": [{"text": msg.content}]
            }));
        }

        let mut generation_config = serde_json::Map::new();
        generation_config.insert("maxOutputTokens".into(), json!(options.max_output_tokens));
        generation_config.insert("temperature".into(), json!(options.temperature));
        if let Some(top_p) = options.top_p {
            generation_config.insert("topP".into(), json!(top_p));
        }
        if let Some(top_k) = options.top_k {
            generation_config.insert("topK".into(), json!(top_k));
        }

        let mut payload = serde_json::Map::new();
        payload.insert("contents".to_string(), json!(contents));
        payload.insert("generationConfig".to_string(), json!(generation_config));

        if let Some(sys) = system_instruction {
            payload.insert("systemInstruction".to_string(), sys);
        }

        serde_json::Value::Object(payload)
    }
}

/// Map a non-success Gemini status onto an [`LLMError`]
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> LLMError {
    match status.as_u16() {
        400 | 404 => LLMError::InvalidRequest(body),
        429 => LLMError::RateLimitExceeded,
        401 | 403 => LLMError::AuthenticationFailed(body),
        _ => LLMError::ProviderUnavailable(format!("Gemini API error ({}): {}", status, body)),
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn check_health(&self) -> bool {
        self.secret_cache.get_secret(GEMINI_API_KEY).is_ok()
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> super::Result<String> {
        let api_key = self
            .secret_cache
            .get_secret(GEMINI_API_KEY)
            .map_err(|e| LLMError::AuthenticationFailed(e.to_string()))?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );

        let payload = Self::build_payload(messages, options);

        tracing::debug!(
            "Gemini request: model={}, messages={}",
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.expose())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        // A blocked or empty candidate is an empty reply, not an error
        let text = data
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .unwrap_or_default();

        if data.get("candidates").is_none() {
            return Err(LLMError::ParseError("No candidates in response".to_string()));
        }

        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let messages = vec![
            Message::system("be nice"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let payload = GeminiProvider::build_payload(&messages, &GenerationOptions::default());

        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be nice");
        assert_eq!(payload["contents"].as_array().unwrap().len(), 2);
        assert_eq!(payload["contents"][1]["role"], "model");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 150);
        assert_eq!(payload["generationConfig"]["topK"], 40);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            LLMError::RateLimitExceeded
        ));
        assert!(matches!(
            status_error(reqwest::StatusCode::FORBIDDEN, String::new()),
            LLMError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            status_error(reqwest::StatusCode::BAD_GATEWAY, String::new()),
            LLMError::ProviderUnavailable(_)
        ));
    }
}
