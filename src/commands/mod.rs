//! Command handlers for the CLI
//!
//! - `chat`: interactive estimate conversation
//! - `sessions`: saved session listing
//! - `quota`: anonymous quota inspection
//!
//! Handlers build their components from [`Config`](crate::config::Config)
//! and print to stdout.

pub mod chat;
pub mod quota;
pub mod render;
pub mod sessions;
pub mod special_commands;

use std::sync::Arc;

use crate::config::Config;
use crate::storage::{KeyValueStore, MemoryStore, SledStore};

/// Open the durable client store named by the configuration
///
/// Falls back to a process-local store when the database cannot be opened.
pub(crate) fn open_storage(config: &Config) -> Arc<dyn KeyValueStore> {
    match SledStore::open_or_default(config.quota.storage_path.as_deref()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!("Client storage unavailable, using memory only: {:#}", e);
            Arc::new(MemoryStore::new())
        }
    }
}
