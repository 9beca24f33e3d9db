//! Session listing handler

use colored::Colorize;

use super::render;
use crate::api::{ChatBackend, HttpChatBackend, Identity};
use crate::config::Config;
use crate::error::{EstimateError, Result};
use crate::session::quota::anonymous_identity;
use crate::session::SessionListCache;

/// Print one page of saved sessions
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `offset` - Pagination offset
pub async fn list_sessions(config: &Config, offset: u32) -> Result<()> {
    let backend = HttpChatBackend::new(&config.backend)?;
    let identity = match &config.backend.auth_token {
        Some(token) => Identity::Authenticated {
            token: token.clone(),
        },
        None => anonymous_identity(super::open_storage(config).as_ref()),
    };

    let sessions = backend
        .list_sessions(&identity, offset)
        .await
        .map_err(EstimateError::from)?;
    tracing::debug!(count = sessions.len(), offset, "Listed sessions");

    let cache = SessionListCache::new(config.chat.new_chat_title.clone());
    println!("\n{}", "Sessions:".bold());
    render::print_sessions(&sessions, &cache, None);
    if !sessions.is_empty() {
        println!();
        println!(
            "Use {} to resume a session, {} for more.",
            "estimate chat --session <INDEX>".cyan(),
            format!("--offset {}", offset as usize + sessions.len()).cyan()
        );
    }
    println!();
    Ok(())
}
