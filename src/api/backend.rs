//! Session/message REST backend
//!
//! Defines the [`ChatBackend`] seam and its reqwest implementation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::envelope::unwrap_envelope;
use super::types::{
    ChatMessageRecord, ChatSession, CreateMessageRequest, CreateMessageResponse, Identity,
    SessionIndex,
};
use super::{ApiError, ApiResult};
use crate::config::BackendConfig;
use crate::error::{EstimateError, Result};

/// Header carrying the anonymous identity token
pub const ANONYMOUS_ID_HEADER: &str = "X-Anonymous-Id";

/// Session and message persistence
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Persist one message. Without `session_index` the backend mints a
    /// session and returns it alongside the message.
    async fn create_message(
        &self,
        identity: &Identity,
        request: &CreateMessageRequest,
    ) -> ApiResult<CreateMessageResponse>;

    /// One page of session summaries, most recent first
    async fn list_sessions(&self, identity: &Identity, offset: u32) -> ApiResult<Vec<ChatSession>>;

    /// One page of a session's messages, in conversation order
    async fn list_messages(
        &self,
        identity: &Identity,
        session: SessionIndex,
        offset: u32,
    ) -> ApiResult<Vec<ChatMessageRecord>>;
}

/// reqwest-backed [`ChatBackend`]
///
/// # Examples
///
/// ```
/// use estimate_chat::api::HttpChatBackend;
/// use estimate_chat::config::BackendConfig;
///
/// let backend = HttpChatBackend::new(&BackendConfig::default());
/// assert!(backend.is_ok());
/// ```
pub struct HttpChatBackend {
    client: Client,
    base_url: String,
}

impl HttpChatBackend {
    /// Create a client for the configured backend
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("estimate-chat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EstimateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized chat backend: base_url={}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        identity: &Identity,
        request: RequestBuilder,
    ) -> ApiResult<T> {
        let response = with_identity(request, identity).send().await.map_err(|e| {
            tracing::error!("Backend request failed: {}", e);
            ApiError::Transport(e.to_string())
        })?;

        read_envelope(response).await
    }
}

fn with_identity(request: RequestBuilder, identity: &Identity) -> RequestBuilder {
    match identity {
        Identity::Authenticated { token } => request.bearer_auth(token),
        Identity::Anonymous { anonymous_id } => request.header(ANONYMOUS_ID_HEADER, anonymous_id),
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let status = response.status();
    let body = response.bytes().await.map_err(|e| {
        tracing::error!("Failed to read backend response: {}", e);
        ApiError::Transport(e.to_string())
    })?;

    match unwrap_envelope(&body) {
        Ok(data) if status.is_success() => Ok(data),
        Ok(_) => Err(ApiError::application(status.as_u16(), None)),
        Err(ApiError::Malformed(detail)) if !status.is_success() => {
            tracing::error!("Backend returned {} without an envelope: {}", status, detail);
            Err(ApiError::application(status.as_u16(), None))
        }
        Err(err) => {
            tracing::warn!("Backend call failed: {}", err);
            Err(err)
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn create_message(
        &self,
        identity: &Identity,
        request: &CreateMessageRequest,
    ) -> ApiResult<CreateMessageResponse> {
        tracing::debug!(
            session = ?request.session_index,
            role = ?request.role,
            "Creating chat message"
        );
        let builder = self.client.post(self.url("chat/message")).json(request);
        self.execute(identity, builder).await
    }

    async fn list_sessions(&self, identity: &Identity, offset: u32) -> ApiResult<Vec<ChatSession>> {
        tracing::debug!(offset, "Listing chat sessions");
        let builder = self
            .client
            .get(self.url("chat/sessions"))
            .query(&[("offset", offset)]);
        self.execute(identity, builder).await
    }

    async fn list_messages(
        &self,
        identity: &Identity,
        session: SessionIndex,
        offset: u32,
    ) -> ApiResult<Vec<ChatMessageRecord>> {
        tracing::debug!(%session, offset, "Listing chat messages");
        let builder = self
            .client
            .get(self.url("chat/messages"))
            .query(&[("sessionIndex", session.0), ("offset", i64::from(offset))]);
        self.execute(identity, builder).await
    }
}
