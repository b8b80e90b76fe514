//! Sakhi Engine Library
//!
//! Session and response-modality engine of a persona chat bot: conversation
//! memory, mood, name capture, text-versus-voice selection, speech rendering
//! and the per-message reply orchestration that ties them together. Used by
//! the `sakhi` binary and the integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Per-conversation turn logs and their storage backends
pub mod memory;

/// Process-wide mood state machine
pub mod mood;

/// Counterpart name capture
pub mod profile;

/// Text-versus-voice decision
pub mod modality;

/// LLM provider abstraction layer
pub mod llm;

/// Text-to-speech and voice-note transcoding
pub mod speech;

/// Image text recognition
pub mod ocr;

/// Messaging transport contract and the Telegram adapter
pub mod transport;

/// Reply orchestration, persona text and dispatching
pub mod agent;

/// Outbound HTTP API
pub mod api_server;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
