//! JSON file-per-conversation store
//!
//! Live logs live at `<memory_dir>/<key>.json` as a bare array of turns.
//! A reset moves the log to `<trash_dir>/<key>-<millis>-<suffix>.json`
//! holding `{key, reset_at, memory}`. An unreadable log is copied verbatim to
//! a sibling `.corrupt` file first.

use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::EngineError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ArchiveRecord, Conversation, ConversationKey, KeyedLocks, MemoryStore};

/// File-backed [`MemoryStore`]
pub struct FileMemoryStore {
    root: PathBuf,
    trash: PathBuf,
    locks: KeyedLocks,
}

impl FileMemoryStore {
    /// Open the store, creating both directories if needed
    pub async fn open(root: &Path, trash: &Path) -> Result<Self, EngineError> {
        for dir in [root, trash] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                EngineError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        info!("Conversation store at {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            trash: trash.to_path_buf(),
            locks: KeyedLocks::new(),
        })
    }

    fn path_for(&self, key: &ConversationKey) -> PathBuf {
        self.root.join(format!("{}.json", key.file_stem()))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
        // Write a sibling first so readers only ever see a whole file
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| EngineError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(EngineError::Storage(format!(
                "Failed to replace {}: {}",
                path.display(),
                e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn fetch(&self, key: &ConversationKey) -> Result<Option<Conversation>, EngineError> {
        let path = self.path_for(key);

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| EngineError::CorruptRecord {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save(
        &self,
        key: &ConversationKey,
        conversation: &Conversation,
    ) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(conversation)
            .map_err(|e| EngineError::Storage(format!("Failed to serialize conversation: {}", e)))?;

        self.write_atomic(&self.path_for(key), &bytes).await?;

        debug!(conversation = %key, turns = conversation.len(), "Conversation saved");
        Ok(())
    }

    async fn archive_and_clear(&self, key: &ConversationKey) -> Result<ArchiveRecord, EngineError> {
        let reset_at = Utc::now();
        let archive_stem = format!(
            "{}-{}-{}",
            key.file_stem(),
            reset_at.timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        // An unreadable log is archived as empty and its raw bytes are kept
        // next to the archive as `.corrupt`
        let memory = match self.fetch(key).await {
            Ok(conversation) => conversation.map(Conversation::into_turns).unwrap_or_default(),
            Err(EngineError::CorruptRecord { reason, .. }) => {
                let raw = tokio::fs::read(self.path_for(key)).await?;
                let corrupt = self.trash.join(format!("{}.corrupt", archive_stem));
                self.write_atomic(&corrupt, &raw).await?;
                warn!(conversation = %key, %reason, "Kept unreadable log at {}", corrupt.display());
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let record = ArchiveRecord {
            key: key.clone(),
            reset_at,
            memory,
        };

        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| EngineError::Storage(format!("Failed to serialize archive: {}", e)))?;
        self.write_atomic(&self.trash.join(format!("{}.json", archive_stem)), &bytes)
            .await?;

        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::Storage(format!(
                    "Archived but failed to clear live log: {}",
                    e
                )))
            }
        }

        info!(conversation = %key, turns = record.memory.len(), "Conversation archived");
        Ok(record)
    }

    async fn archives(&self, key: &ConversationKey) -> Result<Vec<ArchiveRecord>, EngineError> {
        let prefix = format!("{}-", key.file_stem());
        let mut entries = tokio::fs::read_dir(&self.trash)
            .await
            .map_err(|e| EngineError::Storage(format!("Failed to list archives: {}", e)))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::Storage(format!("Failed to list archives: {}", e)))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }

            let contents = tokio::fs::read_to_string(entry.path()).await?;
            match serde_json::from_str::<ArchiveRecord>(&contents) {
                Ok(record) if &record.key == key => records.push(record),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable archive {}: {}", name, e),
            }
        }

        records.sort_by_key(|r| r.reset_at);
        Ok(records)
    }

    fn locks(&self) -> &KeyedLocks {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Modality, Turn};
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> FileMemoryStore {
        FileMemoryStore::open(&dir.path().join("user_memory"), &dir.path().join("trash"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_record_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let key = ConversationKey::new("nobody");
        assert!(store.fetch(&key).await.unwrap().is_none());
        assert!(store.load(&key).await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let key = ConversationKey::new("42");

        let conversation = Conversation::from_turns(vec![
            Turn::system("sys"),
            Turn::user("hello"),
            Turn::assistant("hey!", Modality::Voice),
        ]);
        store.save(&key, &conversation).await.unwrap();

        assert_eq!(store.load(&key).await, conversation);
        assert!(dir.path().join("user_memory/42.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let key = ConversationKey::new("broken");

        std::fs::write(dir.path().join("user_memory/broken.json"), "{not json").unwrap();

        assert!(matches!(
            store.fetch(&key).await,
            Err(EngineError::CorruptRecord { .. })
        ));
        assert!(store.load(&key).await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_keeps_corrupt_bytes() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let key = ConversationKey::new("broken");

        std::fs::write(dir.path().join("user_memory/broken.json"), "{not json").unwrap();

        let record = store.archive_and_clear(&key).await.unwrap();
        assert!(record.memory.is_empty());
        assert!(!dir.path().join("user_memory/broken.json").exists());

        let kept: Vec<_> = std::fs::read_dir(dir.path().join("trash"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "corrupt"))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(std::fs::read_to_string(&kept[0]).unwrap(), "{not json");
        assert_eq!(store.archives(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let key = ConversationKey::new("k");

        for i in 0..3 {
            let c = Conversation::from_turns(vec![Turn::user(format!("m{}", i))]);
            store.save(&key, &c).await.unwrap();
        }

        let names: Vec<_> = std::fs::read_dir(dir.path().join("user_memory"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k.json".to_string()]);
    }
}
