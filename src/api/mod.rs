//! Backend and generative API clients
//!
//! Everything that crosses the network lives here. Failures are
//! normalized to [`ApiError`] at this boundary so callers never inspect
//! transport-level error types.

pub mod backend;
pub mod envelope;
pub mod fake;
pub mod generative;
pub mod sse;
pub mod types;

pub use backend::{ChatBackend, HttpChatBackend};
pub use envelope::unwrap_envelope;
pub use generative::{ChunkStream, GenerationRequest, GenerativeClient, HttpGenerativeClient};
pub use types::{
    ChatMessageRecord, ChatSession, CreateMessageRequest, CreateMessageResponse, FileRef,
    Identity, MessageContent, SessionIndex, WireRole,
};

use thiserror::Error;

/// Shown when the backend reports a failure without a usable message
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Result type at the API seam
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Normalized API failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The request never produced a response (connect, timeout, dropped stream)
    #[error("Network error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status
    #[error("{message}")]
    Application {
        /// Status code from the envelope or the HTTP response
        status_code: u16,
        /// Backend-provided message, or [`GENERIC_FAILURE_MESSAGE`]
        message: String,
    },

    /// The response did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Build an application error, falling back to the generic message
    /// when the backend did not send one
    pub fn application(status_code: u16, message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());
        Self::Application {
            status_code,
            message,
        }
    }

    /// Whether offering the user a retry makes sense
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Application { status_code, .. } => *status_code >= 500 || *status_code == 429,
            Self::Malformed(_) => false,
        }
    }

    /// Text suitable for an error banner
    pub fn user_message(&self) -> String {
        match self {
            Self::Application { message, .. } => message.clone(),
            Self::Transport(_) | Self::Malformed(_) => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_falls_back_to_generic_message() {
        let err = ApiError::application(500, Some("   ".to_string()));
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);

        let err = ApiError::application(400, None);
        assert_eq!(err.to_string(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_application_keeps_backend_message() {
        let err = ApiError::application(403, Some("Session belongs to another user".into()));
        assert_eq!(err.user_message(), "Session belongs to another user");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_is_retryable_with_generic_banner() {
        let err = ApiError::Transport("connection reset".into());
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }
}
