//! estimate-chat - conversational project estimate client library
//!
//! This library provides the client-side orchestration of an AI estimate
//! conversation: chat sessions persisted to a REST backend, replies streamed
//! from a generative endpoint with an embedded invoice, and a daily call
//! quota for anonymous users.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: quota gate, message history, stream accumulator, session
//!   store, session list cache and the [`ChatSessionContext`] tying them together
//! - `api`: backend and generative clients behind traits, plus in-process fakes
//! - `invoice`: invoice types, extraction and reconciliation
//! - `prompts`: system instruction assembly
//! - `storage`: durable client key/value storage
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`, `commands`, `logging`: the `estimate` binary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use estimate_chat::session::SendOutcome;
//! use estimate_chat::storage::SledStore;
//! use estimate_chat::{ChatSessionContext, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let storage = Arc::new(SledStore::open_or_default(None)?);
//!     let mut ctx = ChatSessionContext::from_config(&config, storage)?;
//!     let outcome = ctx.send_message("A booking app for my clinic", vec![]).await?;
//!     if let SendOutcome::QuotaExhausted = outcome {
//!         println!("Come back tomorrow");
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod invoice;
pub mod logging;
pub mod prompts;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use api::{ApiError, Identity, SessionIndex};
pub use config::Config;
pub use error::{EstimateError, Result};
pub use invoice::Invoice;
pub use session::ChatSessionContext;
