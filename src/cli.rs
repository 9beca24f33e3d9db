//! Command-line interface definition for estimate-chat
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// estimate - conversational project estimates from the terminal
///
/// Chat with the estimate assistant, browse saved sessions and inspect
/// the anonymous daily quota.
#[derive(Parser, Debug, Clone)]
#[command(name = "estimate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the backend base URL
    #[arg(long, env = "ESTIMATE_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Override the durable client storage location
    #[arg(long)]
    pub storage_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive estimate conversation
    Chat {
        /// Resume an existing session by its backend index
        #[arg(short, long)]
        session: Option<i64>,
    },

    /// List saved sessions
    Sessions {
        /// Pagination offset
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
    },

    /// Show the anonymous daily quota
    Quota {
        /// Restore today's allowance to the configured limit
        #[arg(long)]
        reset: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            backend_url: None,
            storage_path: None,
            command: Commands::Quota { reset: false },
        }
    }
}
