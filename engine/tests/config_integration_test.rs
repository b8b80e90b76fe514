//! Integration tests for configuration management
//!
//! These tests load real TOML files and check defaults, validation and
//! data-directory processing.

use sakhi_engine::config::Config;
use sdk::errors::EngineError;
use std::fs;
use tempfile::TempDir;

fn minimal_toml(data_dir: &std::path::Path) -> String {
    format!(
        r#"
[core]
data_dir = "{}"

[llm]
default_provider = "gemini"
"#,
        data_dir.display()
    )
}

#[test]
fn test_minimal_file_gets_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, minimal_toml(&dir.path().join("data"))).unwrap();

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.persona.name, "Mohini");
    assert_eq!(config.memory.backend, "file");
    assert_eq!(config.memory.history_cap, 20);
    assert_eq!(config.speech.voice, "Leda");
    assert_eq!(config.speech.max_chars, 200);
    assert!(!config.api_server.enabled);
    assert_eq!(config.dispatcher.queue_capacity, 100);

    // The data directory is created and canonicalized
    assert!(config.core.data_dir.is_absolute());
    assert!(config.core.data_dir.exists());
    assert!(config.memory_dir().ends_with("user_memory"));
    assert!(config.database_path().ends_with("sakhi.db"));
}

#[test]
fn test_full_file_overrides() {
    let dir = TempDir::new().unwrap();
    let toml = format!(
        r#"
[core]
log_level = "debug"
data_dir = "{}"

[persona]
name = "Sakhi"
aliases = ["sakhi ji"]
fallback_name = "dost"

[llm]
default_provider = "ollama"
temperature = 0.4
timeout_secs = 5

[llm.ollama]
model = "llama3.1:8b"

[speech]
enabled = false
provider = "google_translate"
language = "hi"

[memory]
backend = "sqlite"
history_cap = 8

[telegram]
allowed_users = [42, -7]

[api_server]
enabled = true
bind = "0.0.0.0:8080"
api_keys = ["k1"]
allowed_ips = ["*"]
signature = "- sent by Sakhi"

[dispatcher]
idle_worker_secs = 30
"#,
        dir.path().display()
    );

    let config = Config::from_toml_str(&toml).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.persona.aliases, vec!["sakhi ji".to_string()]);
    assert_eq!(config.persona.fallback_name, "dost");
    assert_eq!(config.llm.ollama.model, "llama3.1:8b");
    assert!(!config.speech.enabled);
    assert_eq!(config.speech.provider, "google_translate");
    assert_eq!(config.memory.backend, "sqlite");
    assert_eq!(config.memory.history_cap, 8);
    assert_eq!(config.telegram.allowed_users, vec![42, -7]);
    assert_eq!(config.api_server.signature.as_deref(), Some("- sent by Sakhi"));
    assert_eq!(config.dispatcher.idle_worker_secs, 30);
    // Untouched sections keep their defaults
    assert_eq!(config.ocr.language, "eng");
    assert_eq!(config.dispatcher.queue_capacity, 100);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let base = minimal_toml(dir.path());

    let cases = [
        base.replace("gemini", "openai"),
        format!("{}\n[memory]\nbackend = \"redis\"\n", base),
        format!("{}\n[memory]\nhistory_cap = 0\n", base),
        format!("{}\n[speech]\nprovider = \"polly\"\n", base),
        format!("{}\n[persona]\nname = \"  \"\n", base),
        base.replace("[core]", "[core]\nlog_level = \"loud\""),
    ];

    for toml in cases {
        assert!(
            matches!(Config::from_toml_str(&toml), Err(EngineError::Config(_))),
            "accepted invalid config:\n{}",
            toml
        );
    }
}

#[test]
fn test_missing_file_and_bad_toml() {
    let dir = TempDir::new().unwrap();

    let missing = Config::load_from_path(&dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(EngineError::Config(_))));

    let garbage = Config::from_toml_str("this is = = not toml");
    assert!(matches!(garbage, Err(EngineError::Config(_))));
}

#[test]
fn test_default_config_serializes_to_valid_toml() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default_config();
    config.core.data_dir = dir.path().to_path_buf();

    let serialized = toml::to_string_pretty(&config).unwrap();
    let parsed = Config::from_toml_str(&serialized).unwrap();

    assert_eq!(parsed.persona.system_prompt, config.persona.system_prompt);
    assert_eq!(parsed.api_server.allowed_ips, config.api_server.allowed_ips);
}
