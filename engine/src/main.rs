// Sakhi persona chat bot
// Main entry point for the sakhi binary

use clap::Parser;
use sakhi_engine::cli::{Cli, Command, SecretAction};
use sakhi_engine::config::Config;
use sakhi_engine::handlers::{
    handle_doctor, handle_history, handle_mood, handle_reset, handle_secret_check,
    handle_secret_set, handle_start, OutputFormat,
};
use sakhi_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    // RUST_LOG still wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!(
        "Sakhi v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Start => {
            tracing::info!("Starting bot...");
            handle_start(&config).await
        }

        Command::Reset { conversation } => {
            tracing::info!("Resetting conversation {}", conversation);
            handle_reset(conversation, &config, format).await
        }

        Command::History {
            conversation,
            limit,
            archives,
        } => handle_history(conversation, limit, archives, &config, format).await,

        Command::Mood => handle_mood(format),

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }

        Command::Secret { action } => match action {
            SecretAction::Set { key } => handle_secret_set(&key),
            SecretAction::Check { key } => handle_secret_check(&key, format),
        },
    }
}
