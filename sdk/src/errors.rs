//! Error types and handling
//!
//! This module provides the error types used throughout the Sakhi engine.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints, indicates whether errors are recoverable, and maps each error onto
//! the coarse [`ErrorClass`] taxonomy the reply orchestrator uses to decide
//! how a failed turn is rendered.
//!
//! # Security
//!
//! Error messages never carry API keys or bot tokens. Anything that may reach
//! a chat participant goes through the persona's fixed reply pools instead of
//! the raw `Display` output.

use thiserror::Error;

/// Coarse error classes that drive recovery behavior.
///
/// - **TransientExternalFailure**: a collaborator (LLM, OCR, synthesis,
///   transcoder, transport) failed or timed out. Recovered locally with an
///   in-persona reply or a text fallback.
/// - **CorruptPersistedState**: a stored conversation could not be read.
///   Recovered by treating the conversation as empty.
/// - **PolicyViolation**: the user asked for something malformed. Answered
///   with a short clarification.
/// - **ProcessFatal**: the process cannot continue (bad config, missing
///   credentials at startup). Left to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    TransientExternalFailure,
    CorruptPersistedState,
    PolicyViolation,
    ProcessFatal,
}

/// Trait for engine error extensions
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to print on the operator's terminal. It is never
    /// sent to chat participants.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors fail a single turn. Non-recoverable errors
    /// require operator intervention.
    fn is_recoverable(&self) -> bool;

    /// Returns the recovery class of the error
    fn class(&self) -> ErrorClass;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorClass, ErrorExt};
///
/// let error = EngineError::SpeechSynthesis("provider returned no audio".into());
/// assert_eq!(error.class(), ErrorClass::TransientExternalFailure);
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::Config("unknown provider".into());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt conversation record for {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    // Collaborator errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Speech synthesis error: {0}")]
    SpeechSynthesis(String),

    #[error("Transcoding error: {0}")]
    Transcode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    // User-facing policy errors
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::Storage(_) => "Conversation storage failed. Check the data directory",
            Self::CorruptRecord { .. } => "A conversation file is unreadable and was ignored",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::Ocr(_) => "Text recognition failed. Is tesseract installed?",
            Self::SpeechSynthesis(_) => "Speech provider failed. Replies fall back to text",
            Self::Transcode(_) => "Audio conversion failed. Is ffmpeg installed?",
            Self::Transport(_) => "Messaging transport failed. Check the bot token and network",
            Self::Timeout { .. } => "A provider took too long to respond. Try again",

            Self::InvalidCommand(_) => "Unknown command. Send 'help' for the list",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::MissingSecret(_) => "Set the required environment variable or keychain entry",

            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self.class(), ErrorClass::ProcessFatal)
    }

    fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_)
            | Self::PathCanonicalization(_, _)
            | Self::KeyringError(_)
            | Self::MissingSecret(_) => ErrorClass::ProcessFatal,

            Self::CorruptRecord { .. } => ErrorClass::CorruptPersistedState,

            Self::InvalidCommand(_) => ErrorClass::PolicyViolation,

            Self::Storage(_)
            | Self::LLMProvider(_)
            | Self::Ocr(_)
            | Self::SpeechSynthesis(_)
            | Self::Transcode(_)
            | Self::Transport(_)
            | Self::Timeout { .. }
            | Self::Network(_)
            | Self::Io(_) => ErrorClass::TransientExternalFailure,
        }
    }
}
