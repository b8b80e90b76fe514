//! Configuration management
//!
//! This module handles loading, validation, and management of the Sakhi configuration.
//! Configuration is stored in TOML format at ~/.sakhi/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory and log level
//! - **persona**: Bot name, aliases, and system prompt template
//! - **llm**: Completion provider selection and generation parameters
//! - **speech**: Voice-note synthesis provider and transcoder settings
//! - **ocr**: Image text recognition settings
//! - **memory**: Conversation storage backend and history limits
//! - **telegram**: Messaging transport settings
//! - **api_server**: Outbound `/send-message` API and its access lists
//! - **dispatcher**: Inbound queue sizing
//!
//! API keys and bot tokens are never stored here. They are resolved by
//! [`crate::secrets::SecretManager`] from the environment or the OS keychain.
//!
//! # Examples
//!
//! ```no_run
//! use sakhi_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::persona::DEFAULT_SYSTEM_PROMPT;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Persona settings
    #[serde(default)]
    pub persona: PersonaConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub speech: SpeechConfig,

    /// OCR configuration
    #[serde(default)]
    pub ocr: OcrConfig,

    /// Conversation memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Telegram transport configuration
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Outbound HTTP API configuration
    #[serde(default)]
    pub api_server: ApiServerConfig,

    /// Inbound dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Persona configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Display name of the bot; also used for group-chat eligibility
    #[serde(default = "default_persona_name")]
    pub name: String,

    /// Extra names that count as addressing the bot in groups
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Name used for a counterpart whose name is unknown
    #[serde(default = "default_fallback_name")]
    pub fallback_name: String,

    /// System prompt template. `{name}` and `{user_info}` are substituted.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Completion provider (gemini, ollama)
    pub default_provider: String,

    /// Maximum output tokens per reply
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Sampling temperature (0.0-2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for a single completion call (seconds)
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Gemini provider settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Gemini provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL for Gemini API
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_gemini_model")]
    pub model: String,
    // Note: API key resolved through SecretManager, not stored in config
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Enable voice replies at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Synthesis provider (gemini, google_translate)
    #[serde(default = "default_speech_provider")]
    pub provider: String,

    /// Base URL for the Gemini TTS endpoint
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Gemini TTS model
    #[serde(default = "default_speech_model")]
    pub gemini_model: String,

    /// Prebuilt voice profile
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Language used by the translate provider
    #[serde(default = "default_speech_language")]
    pub language: String,

    /// Base URL for the translate TTS endpoint
    #[serde(default = "default_translate_base_url")]
    pub translate_base_url: String,

    /// Maximum characters sent to the provider
    #[serde(default = "default_speech_max_chars")]
    pub max_chars: usize,

    /// Sample rate of raw PCM returned by the provider (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Path or name of the ffmpeg binary
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    /// Opus bitrate for voice notes
    #[serde(default = "default_bitrate")]
    pub bitrate: String,

    /// Deadline for each pipeline stage (seconds)
    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

/// OCR configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Path or name of the tesseract binary
    #[serde(default = "default_tesseract")]
    pub tesseract: String,

    /// Recognition language
    #[serde(default = "default_ocr_language")]
    pub language: String,

    /// Deadline for download + recognition (seconds)
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Storage backend (file, sqlite)
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Maximum user/assistant turns kept in the live log
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Inbound text longer than this is truncated before storage
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Model replies longer than this are cut before dispatch
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
}

/// Telegram transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Enable the Telegram long-polling transport
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL for the Bot API
    #[serde(default = "default_telegram_base_url")]
    pub base_url: String,

    /// User ids allowed to talk to the bot (empty = everyone)
    #[serde(default)]
    pub allowed_users: Vec<i64>,

    /// Long-poll timeout (seconds)
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

/// Outbound HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    /// Enable the API server
    #[serde(default)]
    pub enabled: bool,

    /// Socket address to bind
    #[serde(default = "default_api_bind")]
    pub bind: String,

    /// Accepted `x-api-key` values
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Accepted caller addresses (`*` allows any)
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,

    /// Line appended to every message sent through the API
    #[serde(default)]
    pub signature: Option<String>,
}

/// Inbound dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Capacity of the bounded inbound queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Idle time after which a conversation worker exits (seconds)
    #[serde(default = "default_idle_worker")]
    pub idle_worker_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.sakhi")
}

fn default_persona_name() -> String {
    "Mohini".to_string()
}

fn default_fallback_name() -> String {
    "yaar".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_output_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.9
}

fn default_llm_timeout() -> u64 {
    15
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "gemma3:12b".to_string()
}

fn default_speech_provider() -> String {
    "gemini".to_string()
}

fn default_speech_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_voice() -> String {
    "Leda".to_string()
}

fn default_speech_language() -> String {
    "en".to_string()
}

fn default_translate_base_url() -> String {
    "https://translate.google.com".to_string()
}

fn default_speech_max_chars() -> usize {
    200
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_bitrate() -> String {
    "16k".to_string()
}

fn default_speech_timeout() -> u64 {
    20
}

fn default_tesseract() -> String {
    "tesseract".to_string()
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_ocr_timeout() -> u64 {
    10
}

fn default_memory_backend() -> String {
    "file".to_string()
}

fn default_history_cap() -> usize {
    20
}

fn default_max_input_chars() -> usize {
    500
}

fn default_max_reply_chars() -> usize {
    250
}

fn default_telegram_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_api_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_allowed_ips() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "::1".to_string()]
}

fn default_queue_capacity() -> usize {
    100
}

fn default_idle_worker() -> u64 {
    300
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            aliases: Vec::new(),
            fallback_name: default_fallback_name(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: "gemini".to_string(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            gemini: GeminiConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_speech_provider(),
            gemini_base_url: default_gemini_base_url(),
            gemini_model: default_speech_model(),
            voice: default_voice(),
            language: default_speech_language(),
            translate_base_url: default_translate_base_url(),
            max_chars: default_speech_max_chars(),
            sample_rate: default_sample_rate(),
            ffmpeg: default_ffmpeg(),
            bitrate: default_bitrate(),
            timeout_secs: default_speech_timeout(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract: default_tesseract(),
            language: default_ocr_language(),
            timeout_secs: default_ocr_timeout(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            history_cap: default_history_cap(),
            max_input_chars: default_max_input_chars(),
            max_reply_chars: default_max_reply_chars(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_telegram_base_url(),
            allowed_users: Vec::new(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_api_bind(),
            api_keys: Vec::new(),
            allowed_ips: default_allowed_ips(),
            signature: None,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            idle_worker_secs: default_idle_worker(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.sakhi/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable `~` form
        let mut config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.sakhi/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".sakhi").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            persona: PersonaConfig::default(),
            llm: LLMConfig::default(),
            speech: SpeechConfig::default(),
            ocr: OcrConfig::default(),
            memory: MemoryConfig::default(),
            telegram: TelegramConfig::default(),
            api_server: ApiServerConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }

    /// Directory holding live conversation records (file backend)
    pub fn memory_dir(&self) -> PathBuf {
        self.core.data_dir.join("user_memory")
    }

    /// Directory holding archived conversations (file backend)
    pub fn trash_dir(&self) -> PathBuf {
        self.core.data_dir.join("trash")
    }

    /// Directory for intermediate speech artifacts
    pub fn temp_dir(&self) -> PathBuf {
        self.core.data_dir.join("temp")
    }

    /// SQLite database path (sqlite backend)
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("sakhi.db")
    }

    /// Validate and process configuration
    ///
    /// Validates enumerated fields and numeric ranges, expands `~` in the data
    /// directory, and creates the data directory if it doesn't exist.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["gemini", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        let valid_speech = ["gemini", "google_translate"];
        if !valid_speech.contains(&self.speech.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid speech provider '{}'. Must be one of: {}",
                self.speech.provider,
                valid_speech.join(", ")
            )));
        }

        let valid_backends = ["file", "sqlite"];
        if !valid_backends.contains(&self.memory.backend.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid memory backend '{}'. Must be one of: {}",
                self.memory.backend,
                valid_backends.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.memory.history_cap == 0 {
            return Err(EngineError::Config(
                "history_cap must be at least 1".to_string(),
            ));
        }

        if self.speech.max_chars == 0 || self.memory.max_reply_chars == 0 {
            return Err(EngineError::Config(
                "max_chars and max_reply_chars must be positive".to_string(),
            ));
        }

        if self.dispatcher.queue_capacity == 0 {
            return Err(EngineError::Config(
                "dispatcher queue_capacity must be positive".to_string(),
            ));
        }

        if self.persona.name.trim().is_empty() {
            return Err(EngineError::Config("persona name must not be empty".to_string()));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        self.core.data_dir = self
            .core
            .data_dir
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(self.core.data_dir.clone(), e.to_string()))?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.default_provider, "gemini");
        assert_eq!(config.memory.history_cap, 20);
        assert_eq!(config.memory.backend, "file");
        assert_eq!(config.persona.name, "Mohini");
        assert!(config.speech.enabled);
        assert!(!config.api_server.enabled);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.persona.system_prompt, deserialized.persona.system_prompt);
        assert_eq!(config.speech.voice, deserialized.speech.voice);
    }

    #[test]
    fn test_invalid_provider_rejected() {
        let mut config = Config::default_config();
        config.llm.default_provider = "carrier-pigeon".to_string();

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_zero_history_cap_rejected() {
        let mut config = Config::default_config();
        config.memory.history_cap = 0;

        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let mut config = Config::default_config();
        config.core.data_dir = PathBuf::from("/srv/sakhi");

        assert_eq!(config.memory_dir(), PathBuf::from("/srv/sakhi/user_memory"));
        assert_eq!(config.trash_dir(), PathBuf::from("/srv/sakhi/trash"));
        assert_eq!(config.temp_dir(), PathBuf::from("/srv/sakhi/temp"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/sakhi/sakhi.db"));
    }
}
