//! Behavior shared by both conversation store backends

use std::sync::Arc;
use tempfile::TempDir;

use sakhi_engine::config::Config;
use sakhi_engine::memory::{
    open_store, Conversation, ConversationKey, FileMemoryStore, MemoryStore, Modality,
    SqliteMemoryStore, Turn,
};

async fn backends(dir: &TempDir) -> Vec<(&'static str, Arc<dyn MemoryStore>)> {
    let file = FileMemoryStore::open(&dir.path().join("memory"), &dir.path().join("trash"))
        .await
        .unwrap();
    let sqlite = SqliteMemoryStore::open(&dir.path().join("db/sakhi.db"))
        .await
        .unwrap();
    vec![("file", Arc::new(file)), ("sqlite", Arc::new(sqlite))]
}

fn sample() -> Conversation {
    let mut conversation = Conversation::new();
    conversation.ensure_system("You are Mohini");
    conversation.insert_profile("Zoya");
    conversation.push(Turn::user("hi"));
    conversation.push(Turn::assistant("Hello Zoya! 😊", Modality::Voice));
    conversation.push(Turn::user("aur?"));
    conversation.push(Turn::assistant("Bas chill", Modality::Pending));
    conversation
}

#[tokio::test]
async fn test_save_and_fetch_preserve_turns() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir).await {
        let key = ConversationKey::new("42");
        assert!(store.fetch(&key).await.unwrap().is_none(), "{}", name);

        store.save(&key, &sample()).await.unwrap();
        let loaded = store.fetch(&key).await.unwrap().unwrap();
        assert_eq!(loaded, sample(), "{}", name);
        assert_eq!(loaded.profile().map(|p| p.name).as_deref(), Some("Zoya"));
        assert!(loaded.has_pending());

        // Saving replaces, never appends
        let mut shorter = sample();
        shorter.prune(1);
        store.save(&key, &shorter).await.unwrap();
        assert_eq!(store.load(&key).await, shorter, "{}", name);

        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_keys_are_isolated() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir).await {
        let direct = ConversationKey::new("42");
        let group = ConversationKey::new("-10042");

        store.save(&direct, &sample()).await.unwrap();
        assert!(store.load(&group).await.is_empty(), "{}", name);

        store.archive_and_clear(&group).await.unwrap();
        assert_eq!(store.load(&direct).await, sample(), "{}", name);

        // Keys that differ only in characters a filesystem can't hold
        let slash = ConversationKey::new("alice/x");
        let underscore = ConversationKey::new("alice_x");
        let mut secret = Conversation::new();
        secret.push(Turn::user("secret of alice/x"));

        store.save(&slash, &secret).await.unwrap();
        assert!(store.load(&underscore).await.is_empty(), "{}", name);

        store.save(&underscore, &sample()).await.unwrap();
        assert_eq!(store.load(&slash).await, secret, "{}", name);

        store.archive_and_clear(&underscore).await.unwrap();
        assert_eq!(store.load(&slash).await, secret, "{}", name);
        assert!(store.archives(&slash).await.unwrap().is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_archive_and_clear() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir).await {
        let key = ConversationKey::new("7");
        store.save(&key, &sample()).await.unwrap();

        let record = store.archive_and_clear(&key).await.unwrap();
        assert_eq!(record.key, key);
        assert_eq!(record.memory, sample().into_turns(), "{}", name);
        assert!(store.fetch(&key).await.unwrap().is_none(), "{}", name);

        // A second reset of an empty conversation still leaves a record
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.archive_and_clear(&key).await.unwrap();
        let archives = store.archives(&key).await.unwrap();
        assert_eq!(archives.len(), 2, "{}", name);
        assert_eq!(archives[0].memory.len(), sample().len());
        assert!(archives[1].memory.is_empty());
        assert!(archives[0].reset_at <= archives[1].reset_at);
    }
}

#[tokio::test]
async fn test_lock_serializes_read_modify_write() {
    let dir = TempDir::new().unwrap();
    for (name, store) in backends(&dir).await {
        let key = ConversationKey::new("race");
        let mut tasks = Vec::new();

        for i in 0..10 {
            let store = Arc::clone(&store);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = store.lock(&key).await;
                let mut conversation = store.load(&key).await;
                tokio::task::yield_now().await;
                conversation.push(Turn::user(format!("m{}", i)));
                store.save(&key, &conversation).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.load(&key).await.len(), 10, "{}", name);
    }
}

#[tokio::test]
async fn test_open_store_follows_backend_setting() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.data_dir = dir.path().to_path_buf();

    config.memory.backend = "file".to_string();
    let store = open_store(&config).await.unwrap();
    store.save(&ConversationKey::new("1"), &sample()).await.unwrap();
    assert!(config.memory_dir().join("1.json").exists());

    config.memory.backend = "sqlite".to_string();
    let store = open_store(&config).await.unwrap();
    assert!(config.database_path().exists());
    // Backends do not share data
    assert!(store.load(&ConversationKey::new("1")).await.is_empty());
    store.close().await.unwrap();
}
