//! Session statistics
//!
//! In-memory only; lost on restart.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::memory::ConversationKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub display_name: String,
    pub turns: u64,
    pub last_seen: DateTime<Utc>,
}

/// Observability sink for eligible turns
pub trait StatsSink: Send + Sync {
    fn record(&self, key: &ConversationKey, display_name: &str);

    fn get(&self, key: &ConversationKey) -> Option<SessionStats>;
}

/// [`StatsSink`] backed by a map, emitting a `tracing` event per turn
#[derive(Debug, Default)]
pub struct InMemoryStats {
    sessions: RwLock<HashMap<ConversationKey, SessionStats>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatsSink for InMemoryStats {
    fn record(&self, key: &ConversationKey, display_name: &str) {
        let mut sessions = match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = sessions.entry(key.clone()).or_insert_with(|| SessionStats {
            display_name: display_name.to_string(),
            turns: 0,
            last_seen: Utc::now(),
        });
        entry.display_name = display_name.to_string();
        entry.turns += 1;
        entry.last_seen = Utc::now();

        info!(
            conversation = %key,
            name = %entry.display_name,
            turns = entry.turns,
            "Session activity"
        );
    }

    fn get(&self, key: &ConversationKey) -> Option<SessionStats> {
        self.sessions.read().ok()?.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_turns_per_conversation() {
        let stats = InMemoryStats::new();
        let zoya = ConversationKey::new("42");
        let group = ConversationKey::new("-100");

        stats.record(&zoya, "yaar");
        stats.record(&zoya, "Zoya");
        stats.record(&group, "Ravi");

        let record = stats.get(&zoya).unwrap();
        assert_eq!(record.turns, 2);
        assert_eq!(record.display_name, "Zoya");
        assert_eq!(stats.len(), 2);
        assert!(stats.get(&ConversationKey::new("7")).is_none());
    }
}
