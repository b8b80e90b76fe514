//! SQLite conversation store
//!
//! Turn logs are stored as JSON text in `conversations`; resets copy the row
//! into `archives` and delete it inside one transaction. A row that no longer
//! parses is archived as empty with its raw text in `corrupt_turns`.
//! The connection uses WAL mode, so call [`MemoryStore::close`] on shutdown
//! to checkpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{ArchiveRecord, Conversation, ConversationKey, KeyedLocks, MemoryStore, Turn};

fn storage_err(context: &str) -> impl FnOnce(sqlx::Error) -> EngineError + '_ {
    move |e| EngineError::Storage(format!("{}: {}", context, e))
}

/// SQLite-backed [`MemoryStore`]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
    locks: KeyedLocks,
}

impl SqliteMemoryStore {
    /// Open (or create) the database and run migrations
    pub async fn open(db_path: &Path) -> Result<Self, EngineError> {
        info!("Initializing conversation database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Storage(format!("Failed to create database directory: {}", e))
            })?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(storage_err("Invalid database path"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err("Failed to connect to database"))?;

        sqlx::raw_sql(include_str!("../../migrations/001_conversations.sql"))
            .execute(&pool)
            .await
            .map_err(storage_err("Failed to execute migration 001_conversations.sql"))?;

        debug!("Conversation database ready");

        Ok(Self {
            pool,
            locks: KeyedLocks::new(),
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn fetch(&self, key: &ConversationKey) -> Result<Option<Conversation>, EngineError> {
        let row = sqlx::query("SELECT turns FROM conversations WHERE conversation_key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("Failed to read conversation"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let turns: String = row.get("turns");
        serde_json::from_str(&turns)
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
        let turns = serde_json::to_string(conversation)
            .map_err(|e| EngineError::Storage(format!("Failed to serialize conversation: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_key, turns, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(conversation_key) DO UPDATE SET
                turns = excluded.turns,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.as_str())
        .bind(turns)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err("Failed to save conversation"))?;

        Ok(())
    }

    async fn archive_and_clear(&self, key: &ConversationKey) -> Result<ArchiveRecord, EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err("Failed to begin transaction"))?;

        let row = sqlx::query("SELECT turns FROM conversations WHERE conversation_key = ?")
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err("Failed to read conversation"))?;

        // An unreadable log is archived as empty with its raw text alongside
        let (memory, corrupt): (Vec<Turn>, Option<String>) = match row {
            Some(row) => {
                let turns: String = row.get("turns");
                match serde_json::from_str(&turns) {
                    Ok(memory) => (memory, None),
                    Err(e) => {
                        warn!(conversation = %key, reason = %e, "Archiving unreadable log verbatim");
                        (Vec::new(), Some(turns))
                    }
                }
            }
            None => (Vec::new(), None),
        };

        let record = ArchiveRecord {
            key: key.clone(),
            reset_at: Utc::now(),
            memory,
        };

        let turns = serde_json::to_string(&record.memory)
            .map_err(|e| EngineError::Storage(format!("Failed to serialize archive: {}", e)))?;

        sqlx::query(
            "INSERT INTO archives (conversation_key, reset_at, turns, corrupt_turns) VALUES (?, ?, ?, ?)",
        )
        .bind(key.as_str())
        .bind(record.reset_at.to_rfc3339())
        .bind(turns)
        .bind(corrupt)
        .execute(&mut *tx)
        .await
        .map_err(storage_err("Failed to write archive"))?;

        sqlx::query("DELETE FROM conversations WHERE conversation_key = ?")
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage_err("Failed to clear conversation"))?;

        tx.commit()
            .await
            .map_err(storage_err("Failed to commit reset"))?;

        info!(conversation = %key, turns = record.memory.len(), "Conversation archived");
        Ok(record)
    }

    async fn archives(&self, key: &ConversationKey) -> Result<Vec<ArchiveRecord>, EngineError> {
        let rows = sqlx::query(
            "SELECT reset_at, turns FROM archives WHERE conversation_key = ? ORDER BY id",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err("Failed to list archives"))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let reset_at: String = row.get("reset_at");
            let turns: String = row.get("turns");

            let reset_at = DateTime::parse_from_rfc3339(&reset_at)
                .map_err(|e| EngineError::CorruptRecord {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?
                .with_timezone(&Utc);
            let memory = serde_json::from_str(&turns).map_err(|e| EngineError::CorruptRecord {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

            records.push(ArchiveRecord {
                key: key.clone(),
                reset_at,
                memory,
            });
        }

        Ok(records)
    }

    fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Checkpoint the WAL and close every connection
    async fn close(&self) -> Result<(), EngineError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(storage_err("Failed to flush WAL"))?;

        self.pool.close().await;
        info!("Conversation database closed");
        Ok(())
    }
}
