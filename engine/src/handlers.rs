//! Command handlers for CLI operations
//!
//! - start: run the bot until Ctrl-C
//! - reset: archive and clear one conversation
//! - history: print stored turns and archives
//! - mood: print the mood report
//! - doctor: validate configuration and check dependencies
//! - secret: manage keychain entries

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::io::BufRead;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{inbound_queue, persona, Dispatcher, OrchestratorSettings, ReplyOrchestrator};
use crate::api_server::ApiServer;
use crate::config::Config;
use crate::llm::{build_provider, OllamaProvider, LLMProvider};
use crate::memory::{open_store, ConversationKey, MemoryStore, Role};
use crate::mood::MoodProcess;
use crate::ocr::TesseractOcr;
use crate::secrets::{SecretCache, SecretManager, GEMINI_API_KEY, TELEGRAM_BOT_TOKEN};
use crate::speech::{spawn_sweeper, SpeechPipeline};
use crate::transport::{TelegramTransport, Transport};

/// Interval between stale speech artifact sweeps
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Speech artifacts older than this are removed
const SWEEP_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Run the bot in the foreground
///
/// Wires Telegram polling into the dispatcher, optionally serves the HTTP API,
/// and on Ctrl-C stops polling, drains in-flight turns and closes the store.
pub async fn handle_start(config: &Config) -> Result<()> {
    if !config.telegram.enabled {
        bail!("No transport enabled. Set [telegram] enabled = true in the config.");
    }

    let secrets = SecretCache::new(Arc::new(SecretManager::default()));
    let token = secrets
        .get_secret(TELEGRAM_BOT_TOKEN)
        .context("Telegram bot token not configured")?;

    let store = open_store(config)
        .await
        .context("Failed to open conversation store")?;
    let llm = build_provider(&config.llm, secrets.clone());
    if !llm.check_health().await {
        tracing::warn!("LLM provider '{}' is not ready; replies will fail", llm.name());
    }

    let transport = Arc::new(
        TelegramTransport::connect(&config.telegram, token)
            .await
            .context("Failed to connect to Telegram")?,
    );

    let mut orchestrator = ReplyOrchestrator::new(
        OrchestratorSettings::from_config(config),
        Arc::clone(&store),
        llm,
        transport.clone(),
    )
    .with_ocr(Arc::new(TesseractOcr::new(&config.ocr)));

    if config.speech.enabled {
        let speech = SpeechPipeline::from_config(&config.speech, &config.temp_dir(), secrets.clone());
        if !speech.check_health().await {
            tracing::warn!("ffmpeg not usable; voice notes will fall back to text");
        }
        orchestrator = orchestrator.with_speech(Arc::new(speech));
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (queue_tx, queue_rx) = inbound_queue(config.dispatcher.queue_capacity);

    let sweeper = spawn_sweeper(
        config.temp_dir(),
        SWEEP_INTERVAL,
        SWEEP_MAX_AGE,
        shutdown_rx.clone(),
    );

    let api = if config.api_server.enabled {
        let transport: Arc<dyn Transport> = transport.clone();
        Some(
            ApiServer::start(&config.api_server, Some(transport))
                .await
                .context("Failed to start API server")?,
        )
    } else {
        None
    };

    let dispatcher = tokio::spawn(
        Dispatcher::new(Arc::new(orchestrator), &config.dispatcher).run(queue_rx),
    );

    let poller = {
        let transport = transport.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { transport.run_polling(queue_tx, shutdown).await })
    };

    println!(
        "Sakhi is running as @{} (Ctrl-C to stop)",
        transport.username().unwrap_or("unknown")
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    poller.await.context("Polling task failed")?;
    let summary = dispatcher.await.context("Dispatcher task failed")?;
    if let Some(api) = api {
        api.shutdown().await;
    }
    sweeper.await.ok();
    store.close().await.context("Failed to close conversation store")?;

    println!(
        "Stopped after {} messages ({} workers)",
        summary.dispatched, summary.workers_spawned
    );
    Ok(())
}

/// Archive and clear a conversation
pub async fn handle_reset(conversation: String, config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(config).await.context("Failed to open conversation store")?;
    let key = ConversationKey::new(conversation);

    let record = {
        let _guard = store.lock(&key).await;
        store
            .archive_and_clear(&key)
            .await
            .context("Failed to archive conversation")?
    };
    store.close().await?;

    match format {
        OutputFormat::Text => println!(
            "Archived {} turns of {} at {}",
            record.memory.len(),
            key,
            record.reset_at.format("%Y-%m-%d %H:%M:%S")
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "conversation": key,
                "archived_turns": record.memory.len(),
                "reset_at": record.reset_at,
            }))?
        ),
    }
    Ok(())
}

/// Show stored turns for a conversation
pub async fn handle_history(
    conversation: String,
    limit: usize,
    archives: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let store = open_store(config).await.context("Failed to open conversation store")?;
    let key = ConversationKey::new(conversation);

    let stored = store
        .fetch(&key)
        .await
        .context("Failed to read conversation")?
        .unwrap_or_default();
    let archived = if archives {
        store.archives(&key).await.context("Failed to list archives")?
    } else {
        Vec::new()
    };
    store.close().await?;

    let turns = stored.turns();
    let recent = &turns[turns.len().saturating_sub(limit)..];

    match format {
        OutputFormat::Text => {
            if turns.is_empty() {
                println!("No stored turns for {}", key);
            } else {
                if let Some(profile) = stored.profile() {
                    println!("Profile: {}", profile.name);
                }
                println!("Conversation {} (last {} of {} turns):", key, recent.len(), turns.len());
                println!();
                for turn in recent {
                    if turn.role == Role::System {
                        continue;
                    }
                    let tag = turn
                        .modality
                        .map(|m| format!(" [{}]", m))
                        .unwrap_or_default();
                    println!("  {:<10}{} {}", format!("{:?}:", turn.role), tag, turn.content);
                }
            }

            for record in &archived {
                println!(
                    "Archive {}: {} turns",
                    record.reset_at.format("%Y-%m-%d %H:%M:%S"),
                    record.memory.len()
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "conversation": key,
                "turns": recent,
                "count": turns.len(),
                "limit": limit,
                "archives": archived,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Print the mood report of a freshly started process
pub fn handle_mood(format: OutputFormat) -> Result<()> {
    let snapshot = MoodProcess::new().snapshot();
    match format {
        OutputFormat::Text => println!("{}", persona::mood_report(snapshot.mood)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
    }
    Ok(())
}

async fn binary_runs(binary: &str, arg: &str) -> bool {
    tokio::process::Command::new(binary)
        .arg(arg)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Validate configuration and external dependencies
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();
    let secrets = SecretManager::default();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    if config.core.data_dir.exists() {
        checks.push(("Data directory", "Exists".to_string()));
    } else {
        checks.push(("Data directory", "Missing".to_string()));
        issues.push(format!("Data directory does not exist: {:?}", config.core.data_dir));
    }

    match open_store(config).await {
        Ok(store) => {
            checks.push(("Memory store", format!("OK ({})", config.memory.backend)));
            store.close().await.ok();
        }
        Err(e) => {
            checks.push(("Memory store", "Failed".to_string()));
            issues.push(format!("Cannot open {} store: {}", config.memory.backend, e));
        }
    }

    match config.llm.default_provider.as_str() {
        "ollama" => {
            let ollama =
                OllamaProvider::new(config.llm.ollama.base_url.clone(), config.llm.ollama.model.clone());
            if ollama.check_health().await {
                checks.push(("Ollama", "Available".to_string()));
            } else {
                checks.push(("Ollama", "Not available".to_string()));
                issues.push("Ollama is not running. Start Ollama or switch to gemini.".to_string());
            }
        }
        _ => {
            if secrets.has_secret(GEMINI_API_KEY) {
                checks.push(("Gemini API key", "Configured".to_string()));
            } else {
                checks.push(("Gemini API key", "Not configured".to_string()));
                issues.push(format!(
                    "Set {} or run 'sakhi secret set {}'",
                    SecretManager::env_var(GEMINI_API_KEY),
                    GEMINI_API_KEY
                ));
            }
        }
    }

    if config.telegram.enabled {
        if secrets.has_secret(TELEGRAM_BOT_TOKEN) {
            checks.push(("Telegram bot token", "Configured".to_string()));
        } else {
            checks.push(("Telegram bot token", "Not configured".to_string()));
            issues.push(format!(
                "Set {} or run 'sakhi secret set {}'",
                SecretManager::env_var(TELEGRAM_BOT_TOKEN),
                TELEGRAM_BOT_TOKEN
            ));
        }
    } else {
        checks.push(("Telegram", "Disabled".to_string()));
    }

    if config.speech.enabled {
        checks.push(("Speech provider", config.speech.provider.clone()));
        if binary_runs(&config.speech.ffmpeg, "-version").await {
            checks.push(("ffmpeg", "Available".to_string()));
        } else {
            checks.push(("ffmpeg", "Not found".to_string()));
            issues.push(format!(
                "'{}' not runnable; voice notes will fall back to text",
                config.speech.ffmpeg
            ));
        }
    } else {
        checks.push(("Speech", "Disabled".to_string()));
    }

    if binary_runs(&config.ocr.tesseract, "--version").await {
        checks.push(("tesseract", "Available".to_string()));
    } else {
        checks.push(("tesseract", "Not found".to_string()));
        issues.push("tesseract not runnable; images will get the placeholder reply".to_string());
    }

    checks.push((
        "Build",
        format!("{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_COMMIT_HASH")),
    ));

    match format {
        OutputFormat::Text => {
            println!("Sakhi System Diagnostics");
            println!("========================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Store a secret read from the first line of stdin
pub fn handle_secret_set(key: &str) -> Result<()> {
    eprintln!("Enter value for {} and press Enter:", key);
    let mut value = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut value)
        .context("Failed to read secret from stdin")?;

    SecretManager::default()
        .set_secret(key, value.trim())
        .with_context(|| format!("Failed to store {}", key))?;
    println!("Stored {} in the OS keychain", key);
    Ok(())
}

/// Report whether a secret resolves, without printing it
pub fn handle_secret_check(key: &str, format: OutputFormat) -> Result<()> {
    let configured = SecretManager::default().has_secret(key);
    match format {
        OutputFormat::Text => println!(
            "{}: {}",
            key,
            if configured { "configured" } else { "not configured" }
        ),
        OutputFormat::Json => println!("{}", json!({ "key": key, "configured": configured })),
    }
    Ok(())
}
