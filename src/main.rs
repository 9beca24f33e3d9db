//! estimate - conversational project estimates from the terminal
//!
#![doc = "Main entry point for the estimate CLI."]

use anyhow::Result;

use estimate_chat::cli::{Cli, Commands};
use estimate_chat::commands;
use estimate_chat::config::Config;
use estimate_chat::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    logging::init_logging(&config.logging)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Chat { session } => {
            tracing::info!("Starting interactive chat");
            if let Some(index) = session {
                tracing::debug!("Resuming session: {}", index);
            }
            commands::chat::run_chat(config, session).await?;
            Ok(())
        }
        Commands::Sessions { offset } => {
            commands::sessions::list_sessions(&config, offset).await?;
            Ok(())
        }
        Commands::Quota { reset } => {
            commands::quota::show_quota(&config, reset)?;
            Ok(())
        }
    }
}
