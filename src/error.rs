//! Error types for estimate-chat
//!
//! This module defines the crate-wide error type and result aliases,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::api::ApiError;

/// Main error type for estimate-chat operations
///
/// Covers configuration loading, backend and generative API calls,
/// durable client storage, invoice parsing and turn bookkeeping.
#[derive(Error, Debug)]
pub enum EstimateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Normalized backend or generative API failure
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Durable client storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedded invoice block was present but did not match the invoice shape
    #[error("Invoice parse error: {0}")]
    InvoiceParse(String),

    /// A streamed reply is still open in the active conversation
    #[error("A reply is still streaming; wait for it to finish before sending")]
    StreamInProgress,

    /// A turn index or stream handle does not refer to a live turn
    #[error("Unknown turn: {0}")]
    UnknownTurn(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for estimate-chat operations
///
/// Uses `anyhow::Error` so callers can attach context while still being
/// able to downcast to [`EstimateError`].
pub type Result<T> = anyhow::Result<T>;
