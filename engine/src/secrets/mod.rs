//! Credential lookup and scrubbing
//!
//! API keys and bot tokens are resolved from the environment first
//! (`gemini_api_key` → `GEMINI_API_KEY`), then from the OS keychain under the
//! `sakhi` service. Nothing is ever prompted for: the bot runs unattended, so
//! a missing secret is an [`EngineError::MissingSecret`].
//!
//! Every string that may leave the process (logs, replies, API error bodies)
//! can be passed through [`scrub`] to redact anything that looks like a
//! credential.

pub mod cache;

pub use cache::SecretCache;

use keyring::Entry;
use regex::Regex;
use sdk::errors::EngineError;
use std::fmt;
use std::sync::OnceLock;

/// Keychain service name
pub const SERVICE_NAME: &str = "sakhi";

pub const GEMINI_API_KEY: &str = "gemini_api_key";
pub const TELEGRAM_BOT_TOKEN: &str = "telegram_bot_token";

/// Sensitive string that never prints its value
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The raw value. Keep the result out of logs.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        vec![
            // Google API keys, also embedded in `?key=` query strings
            Regex::new(r"AIza[0-9A-Za-z\-_]{35}").expect("Invalid Google pattern"),
            // Telegram bot tokens, including inside /bot<token>/ URLs
            Regex::new(r"[0-9]{8,10}:[a-zA-Z0-9\-_]{35}").expect("Invalid Telegram pattern"),
            Regex::new(r"Bearer\s+[^\s]{20,}").expect("Invalid Bearer pattern"),
            Regex::new(r"(?i)([?&]key=)[^&\s]+").expect("Invalid query key pattern"),
        ]
    })
}

/// Replace anything that looks like a credential with `[REDACTED]`
///
/// # Examples
///
/// ```
/// use sakhi_engine::secrets::scrub;
///
/// let line = "GET https://example.com/models/x:generateContent?key=abc123";
/// assert_eq!(scrub(line), "GET https://example.com/models/x:generateContent?key=[REDACTED]");
/// ```
pub fn scrub(text: &str) -> String {
    let mut result = text.to_string();
    for (i, pattern) in secret_patterns().iter().enumerate() {
        // The query-string pattern keeps its `?key=` prefix
        let replacement = if i == 3 { "${1}[REDACTED]" } else { "[REDACTED]" };
        result = pattern.replace_all(&result, replacement).into_owned();
    }
    result
}

/// Resolves secrets from the environment and the OS keychain
pub struct SecretManager {
    service_name: String,
}

impl Default for SecretManager {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl SecretManager {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Environment variable consulted for `key`
    pub fn env_var(key: &str) -> String {
        key.to_uppercase()
    }

    /// Look up `key` in the environment, then the keychain
    ///
    /// # Errors
    ///
    /// [`EngineError::MissingSecret`] when neither source has a value;
    /// [`EngineError::KeyringError`] when the keychain itself fails.
    pub fn get_secret(&self, key: &str) -> Result<String, EngineError> {
        let var = Self::env_var(key);
        if let Ok(value) = std::env::var(&var) {
            if !value.trim().is_empty() {
                tracing::debug!("Using secret '{}' from ${}", key, var);
                return Ok(value.trim().to_string());
            }
        }

        let entry = Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })?;

        match entry.get_password() {
            Ok(secret) => {
                tracing::debug!("Retrieved secret '{}' from keychain", key);
                Ok(secret)
            }
            Err(keyring::Error::NoEntry) => Err(EngineError::MissingSecret(format!(
                "{} (set ${} or store it in the keychain)",
                key, var
            ))),
            Err(e) => Err(EngineError::KeyringError(format!(
                "Failed to retrieve secret '{}': {}",
                key, e
            ))),
        }
    }

    /// Store `value` in the keychain
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if value.trim().is_empty() {
            return Err(EngineError::KeyringError("Secret cannot be empty".to_string()));
        }

        let entry = Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })?;

        entry.set_password(value).map_err(|e| {
            EngineError::KeyringError(format!("Failed to store secret '{}': {}", key, e))
        })?;

        tracing::info!("Stored secret '{}' in keychain", key);
        Ok(())
    }

    /// Whether `key` resolves from either source, without failing
    pub fn has_secret(&self, key: &str) -> bool {
        self.get_secret(key).is_ok()
    }
}
