//! Name capture
//!
//! [`NameExtractor`] is the pluggable strategy; [`PatternNameExtractor`] is the
//! default, matching a handful of English and Hinglish introductions against
//! the whole trimmed message. [`record_name`] writes the result into a
//! conversation exactly once.

use regex::Regex;
use std::sync::OnceLock;

use crate::agent::persona;
use crate::memory::{Conversation, Profile};

/// Strategy for spotting the counterpart's name in a message
pub trait NameExtractor: Send + Sync {
    /// Returns the capitalized name, or `None`.
    ///
    /// Implementations must return `None` whenever `existing` is set.
    fn extract(&self, text: &str, existing: Option<&Profile>) -> Option<String>;
}

/// Words that look like names in "i am X" but never are
const DENYLIST: &[&str] = &[
    "good", "bad", "yes", "no", "ok", "okay", "fine", "nice", "great", "cool", "awesome", "thanks",
    "thank", "welcome", "sorry", "hello", "hi", "hey", "bye", "see", "you", "me", "we", "they",
    "this", "that", "what", "when", "where", "why", "how",
];

static NAME_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn name_patterns() -> &'static Vec<Regex> {
    NAME_PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)^(?:my name is|i am|i'm)\s+([a-z]+)$").expect("Invalid intro pattern"),
            Regex::new(r"(?i)^(?:main|mera naam)\s+([a-z]+)\s+(?:hai|hoon)$")
                .expect("Invalid hinglish intro pattern"),
            Regex::new(r"(?i)^(?:naam hai|call me)\s+([a-z]+)$").expect("Invalid call-me pattern"),
            Regex::new(r"(?i)^([a-z]+)\s+(?:hai mera naam|is my name)$")
                .expect("Invalid trailing-name pattern"),
        ]
    })
}

/// Regex-based [`NameExtractor`]
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternNameExtractor;

impl PatternNameExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl NameExtractor for PatternNameExtractor {
    fn extract(&self, text: &str, existing: Option<&Profile>) -> Option<String> {
        if existing.is_some() {
            return None;
        }

        let text = text.trim();
        name_patterns().iter().find_map(|pattern| {
            let candidate = pattern.captures(text)?.get(1)?.as_str();
            let lower = candidate.to_lowercase();
            if candidate.chars().count() > 1 && !DENYLIST.contains(&lower.as_str()) {
                Some(capitalize(&lower))
            } else {
                None
            }
        })
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Store `name` as the conversation's profile
///
/// Inserts the profile turn after the system turn and rewrites the system
/// prompt's user-info line. Returns `false`, leaving the conversation
/// untouched, when a profile already exists.
pub fn record_name(conversation: &mut Conversation, name: &str) -> bool {
    if !conversation.insert_profile(name) {
        return false;
    }

    if let Some(system) = conversation.system_mut() {
        system.content = persona::rewrite_user_info(&system.content, &persona::user_info(Some(name)));
    }

    true
}
