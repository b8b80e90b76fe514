//! Conversation memory
//!
//! Every counterparty (direct chat or group) owns an ordered log of [`Turn`]s
//! keyed by a [`ConversationKey`]. The log is made of an unbounded prefix of
//! `system`/`profile` turns followed by a bounded suffix of `user`/`assistant`
//! turns; [`Conversation::prune`] keeps the suffix at the configured cap.
//!
//! Storage is abstracted behind [`MemoryStore`]. Two backends exist:
//!
//! - [`file::FileMemoryStore`]: one JSON file per conversation, archives under `trash/`
//! - [`sqlite::SqliteMemoryStore`]: `conversations` and `archives` tables
//!
//! Reads never fail from the caller's point of view: a missing or corrupt
//! record degrades to an empty conversation. Writes report errors so the
//! caller can log them, but a failed write never blocks a reply.
//!
//! Access is serialized per key through [`KeyedLocks`]; callers hold the guard
//! returned by [`MemoryStore::lock`] across a whole load-mutate-save cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::config::Config;

pub mod file;
pub mod sqlite;

pub use file::FileMemoryStore;
pub use sqlite::SqliteMemoryStore;

/// Opaque, stable identifier of a counterparty
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe rendering of the key
    ///
    /// Bytes outside `[A-Za-z0-9.@-]`, and a leading `.`, are written as
    /// `_XX` hex escapes. `_` itself is always escaped, so distinct keys never
    /// share a stem and no stem can leave the storage directory.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for (i, byte) in self.0.bytes().enumerate() {
            let keep = byte.is_ascii_alphanumeric()
                || matches!(byte, b'@' | b'-')
                || (byte == b'.' && i > 0);
            if keep {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("_{:02X}", byte));
            }
        }
        stem
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Role of a turn in the conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Profile,
    User,
    Assistant,
}

impl Role {
    /// Prefix roles are never pruned
    pub fn is_prefix(self) -> bool {
        matches!(self, Role::System | Role::Profile)
    }
}

/// Channel an assistant turn was (or will be) delivered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Reply generated, delivery channel not decided yet
    Pending,
    Text,
    Voice,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Pending => write!(f, "pending"),
            Modality::Text => write!(f, "text"),
            Modality::Voice => write!(f, "voice"),
        }
    }
}

/// One role-tagged entry in a conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default)]
    pub content: String,

    /// Only set on assistant turns. Older records call this field `type`.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,

    /// Only set on the profile turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            modality: None,
            name: None,
        }
    }

    pub fn profile(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            role: Role::Profile,
            content: format!("User's name is {}", name),
            modality: None,
            name: Some(name),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            modality: None,
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>, modality: Modality) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            modality: Some(modality),
            name: None,
        }
    }
}

/// Durable fact about the counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
}

/// Ordered turn log of one conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Profile recorded for this conversation, if any
    pub fn profile(&self) -> Option<Profile> {
        self.turns
            .iter()
            .find(|t| t.role == Role::Profile)
            .and_then(|t| t.name.clone())
            .map(|name| Profile { name })
    }

    pub fn system(&self) -> Option<&Turn> {
        self.turns.first().filter(|t| t.role == Role::System)
    }

    pub fn system_mut(&mut self) -> Option<&mut Turn> {
        self.turns.first_mut().filter(|t| t.role == Role::System)
    }

    /// Insert the system turn at the front unless one is already there
    ///
    /// Returns `true` when a turn was inserted.
    pub fn ensure_system(&mut self, content: impl Into<String>) -> bool {
        if self.system().is_some() {
            return false;
        }
        self.turns.insert(0, Turn::system(content));
        true
    }

    /// Insert a profile turn right after the system turn
    ///
    /// Does nothing and returns `false` when a profile already exists.
    pub fn insert_profile(&mut self, name: impl Into<String>) -> bool {
        if self.turns.iter().any(|t| t.role == Role::Profile) {
            return false;
        }
        let at = usize::from(self.system().is_some());
        self.turns.insert(at, Turn::profile(name));
        true
    }

    /// Number of user/assistant turns
    pub fn chat_len(&self) -> usize {
        self.turns.iter().filter(|t| !t.role.is_prefix()).count()
    }

    /// Keep the prefix and the most recent `cap` chat turns
    pub fn prune(&mut self, cap: usize) {
        let chat_len = self.chat_len();
        if chat_len <= cap {
            return;
        }

        let mut to_drop = chat_len - cap;
        self.turns.retain(|t| {
            if t.role.is_prefix() || to_drop == 0 {
                true
            } else {
                to_drop -= 1;
                false
            }
        });
    }

    /// Modalities of the last `n` delivered assistant turns, oldest first
    ///
    /// Pending turns are skipped; turns without a tag count as text.
    pub fn recent_assistant_modalities(&self, n: usize) -> Vec<Modality> {
        let mut recent: Vec<Modality> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::Assistant && t.modality != Some(Modality::Pending))
            .take(n)
            .map(|t| t.modality.unwrap_or(Modality::Text))
            .collect();
        recent.reverse();
        recent
    }

    /// Resolve the most recent pending assistant turn
    ///
    /// Returns `false` when no pending turn exists.
    pub fn resolve_pending(&mut self, modality: Modality) -> bool {
        match self
            .turns
            .iter_mut()
            .rev()
            .find(|t| t.role == Role::Assistant && t.modality == Some(Modality::Pending))
        {
            Some(turn) => {
                turn.modality = Some(modality);
                true
            }
            None => false,
        }
    }

    /// Whether any assistant turn is still awaiting its delivery channel
    pub fn has_pending(&self) -> bool {
        self.turns
            .iter()
            .any(|t| t.role == Role::Assistant && t.modality == Some(Modality::Pending))
    }
}

/// Retention record written by a reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub key: ConversationKey,
    pub reset_at: DateTime<Utc>,
    pub memory: Vec<Turn>,
}

/// Per-key async mutexes
///
/// Entries nobody holds or waits on are dropped on the next acquisition, so
/// the map only grows with the number of concurrently active conversations.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<ConversationKey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Durable per-conversation turn log
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Read the stored conversation
    ///
    /// `Ok(None)` when nothing is stored. Unreadable records surface as
    /// [`EngineError::CorruptRecord`].
    async fn fetch(&self, key: &ConversationKey) -> Result<Option<Conversation>, EngineError>;

    /// Replace the stored conversation as a whole
    async fn save(&self, key: &ConversationKey, conversation: &Conversation)
        -> Result<(), EngineError>;

    /// Move the current log to a timestamped archive and clear the live record
    async fn archive_and_clear(&self, key: &ConversationKey) -> Result<ArchiveRecord, EngineError>;

    /// Archive records for `key`, oldest first
    async fn archives(&self, key: &ConversationKey) -> Result<Vec<ArchiveRecord>, EngineError>;

    /// Lock table used to serialize access per key
    fn locks(&self) -> &KeyedLocks;

    /// Read the stored conversation, degrading any failure to an empty log
    async fn load(&self, key: &ConversationKey) -> Conversation {
        match self.fetch(key).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => Conversation::new(),
            Err(e) => {
                warn!(conversation = %key, error = %e, "Conversation unreadable, starting fresh");
                Conversation::new()
            }
        }
    }

    /// Exclusive access to `key` for a load-mutate-save cycle
    async fn lock(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        self.locks().acquire(key).await
    }

    /// Flush and release resources; the store is unusable afterwards
    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Open the backend selected by `memory.backend`
pub async fn open_store(config: &Config) -> Result<Arc<dyn MemoryStore>, EngineError> {
    let store: Arc<dyn MemoryStore> = match config.memory.backend.as_str() {
        "sqlite" => Arc::new(SqliteMemoryStore::open(&config.database_path()).await?),
        _ => Arc::new(FileMemoryStore::open(&config.memory_dir(), &config.trash_dir()).await?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::user(format!("u{}", i))
                } else {
                    Turn::assistant(format!("a{}", i), Modality::Text)
                }
            })
            .collect()
    }

    #[test]
    fn test_prune_keeps_prefix_and_recent_window() {
        let mut turns = vec![Turn::system("sys"), Turn::profile("Zoya")];
        turns.extend(chat(30));
        let mut conversation = Conversation::from_turns(turns);

        conversation.prune(20);

        assert_eq!(conversation.chat_len(), 20);
        assert_eq!(conversation.turns()[0].role, Role::System);
        assert_eq!(conversation.turns()[1].role, Role::Profile);
        assert_eq!(conversation.turns()[2].content, "u10");
        assert_eq!(conversation.turns().last().unwrap().content, "a29");
    }

    #[test]
    fn test_prune_under_cap_is_noop() {
        let mut conversation = Conversation::from_turns(chat(5));
        let before = conversation.clone();
        conversation.prune(20);
        assert_eq!(conversation, before);
    }

    #[test]
    fn test_insert_profile_after_system_once() {
        let mut conversation = Conversation::new();
        conversation.ensure_system("sys");
        conversation.push(Turn::user("hi"));

        assert!(conversation.insert_profile("Zoya"));
        assert!(!conversation.insert_profile("Other"));

        assert_eq!(conversation.turns()[1].role, Role::Profile);
        assert_eq!(conversation.profile().unwrap().name, "Zoya");
    }

    #[test]
    fn test_ensure_system_only_once() {
        let mut conversation = Conversation::from_turns(vec![Turn::user("hi")]);
        assert!(conversation.ensure_system("a"));
        assert!(!conversation.ensure_system("b"));
        assert_eq!(conversation.system().unwrap().content, "a");
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_recent_assistant_modalities_skips_user_and_pending_turns() {
        let conversation = Conversation::from_turns(vec![
            Turn::assistant("1", Modality::Voice),
            Turn::user("x"),
            Turn::assistant("2", Modality::Text),
            Turn::user("y"),
            Turn::assistant("3", Modality::Voice),
            Turn::user("z"),
            Turn::assistant("4", Modality::Pending),
        ]);

        assert_eq!(
            conversation.recent_assistant_modalities(2),
            vec![Modality::Text, Modality::Voice]
        );
    }

    #[test]
    fn test_resolve_pending() {
        let mut conversation = Conversation::from_turns(vec![
            Turn::user("x"),
            Turn::assistant("reply", Modality::Pending),
        ]);
        assert!(conversation.has_pending());
        assert!(conversation.resolve_pending(Modality::Text));
        assert!(!conversation.has_pending());
        assert!(!conversation.resolve_pending(Modality::Voice));
        assert_eq!(conversation.turns()[1].modality, Some(Modality::Text));
    }

    #[test]
    fn test_turn_json_shape() {
        let json = serde_json::to_value(Turn::assistant("hey", Modality::Voice)).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["modality"], "voice");
        assert!(json.get("name").is_none());

        let user = serde_json::to_value(Turn::user("hi")).unwrap();
        assert!(user.get("modality").is_none());
    }

    #[test]
    fn test_reads_legacy_type_field() {
        let turn: Turn =
            serde_json::from_str(r#"{"role":"assistant","content":"hi","type":"voice"}"#).unwrap();
        assert_eq!(turn.modality, Some(Modality::Voice));
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(ConversationKey::new("-100123").file_stem(), "-100123");
        assert_eq!(ConversationKey::new("../etc/passwd").file_stem(), "_2E._2Fetc_2Fpasswd");
        assert_eq!(ConversationKey::new("..").file_stem(), "_2E.");
        assert_eq!(ConversationKey::new("a b").file_stem(), "a_20b");
        assert_eq!(ConversationKey::new("-1001234@chat.example").file_stem(), "-1001234@chat.example");

        let stems: std::collections::HashSet<String> = ["alice/x", "alice_x", "alice?x", "alice_2Fx"]
            .iter()
            .map(|k| ConversationKey::new(*k).file_stem())
            .collect();
        assert_eq!(stems.len(), 4);
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let key = ConversationKey::new("k");

        let guard = locks.acquire(&key).await;

        let locks2 = Arc::clone(&locks);
        let key2 = key.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire(&key2).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_keyed_locks_prune_idle_entries() {
        let locks = KeyedLocks::new();
        for i in 0..10 {
            let _g = locks.acquire(&ConversationKey::new(format!("k{}", i))).await;
        }
        let _g = locks.acquire(&ConversationKey::new("last")).await;
        assert_eq!(locks.tracked(), 1);
    }
}
