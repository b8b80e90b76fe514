//! CLI interface for Sakhi
//!
//! Defines all commands and global flags using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sakhi persona chat bot
///
/// Answers chat messages in character, remembers who it talks to, and
/// decides per reply whether to type or send a voice note.
#[derive(Parser, Debug)]
#[command(name = "sakhi")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bot in the foreground until Ctrl-C
    Start,

    /// Archive and clear a conversation's memory
    Reset {
        /// Conversation key (chat id; group ids are negative)
        #[arg(allow_hyphen_values = true)]
        conversation: String,
    },

    /// Show a conversation's stored turns
    History {
        /// Conversation key (chat id; group ids are negative)
        #[arg(allow_hyphen_values = true)]
        conversation: String,

        /// Number of most recent turns to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Also list archived resets
        #[arg(long)]
        archives: bool,
    },

    /// Show the mood a fresh process starts in, and the mood set
    Mood,

    /// Validate configuration and check external dependencies
    Doctor,

    /// Manage API keys in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Store a secret read from stdin
    Set {
        /// Secret name (gemini_api_key, telegram_bot_token)
        key: String,
    },

    /// Report whether a secret resolves
    Check {
        key: String,
    },
}
