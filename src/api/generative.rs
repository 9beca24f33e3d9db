//! Generative AI streaming endpoint
//!
//! Sends the conversation plus a system instruction and yields the model's
//! text as it arrives. The structured invoice travels inside that text;
//! see [`crate::invoice`].

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

use super::sse;
use super::types::{FileRef, Identity};
use super::{ApiError, ApiResult};
use crate::config::GenerativeConfig;
use crate::error::{EstimateError, Result};

/// Incremental model output, one text fragment per item
pub type ChunkStream = Pin<Box<dyn Stream<Item = ApiResult<String>> + Send>>;

/// Author of a [`Content`] entry as the model API spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

/// One part of a conversation entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

/// Reference to an uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

impl From<&FileRef> for Part {
    fn from(file: &FileRef) -> Self {
        Part::File {
            file_data: FileData {
                mime_type: file.mime_type.clone(),
                file_uri: file.uri.clone(),
            },
        }
    }
}

/// One conversation entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

/// A streamed generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Persona, rules, dataset and localization, already assembled
    pub system_instruction: String,
    /// Conversation so far, oldest first, ending with the user's turn
    pub contents: Vec<Content>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: &'a [Content],
    system_instruction: SystemInstruction,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Streams model output for a conversation
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Open a generation stream. Errors before the first byte are returned
    /// here; errors after it arrive as stream items.
    async fn stream_generate(
        &self,
        identity: &Identity,
        request: &GenerationRequest,
    ) -> ApiResult<ChunkStream>;
}

/// SSE-speaking [`GenerativeClient`]
pub struct HttpGenerativeClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerativeClient {
    /// Create a client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: &GenerativeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("estimate-chat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EstimateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            "Initialized generative client: endpoint={}, model={}",
            config.endpoint,
            config.model
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.endpoint, self.model
        )
    }
}

/// Text carried by one SSE payload; empty when the chunk has no text parts
pub(crate) fn chunk_text(payload: &str) -> ApiResult<String> {
    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| ApiError::Malformed(format!("unreadable stream chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        let status = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Err(ApiError::application(status, message));
    }

    Ok(chunk
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect())
}

#[async_trait]
impl GenerativeClient for HttpGenerativeClient {
    async fn stream_generate(
        &self,
        identity: &Identity,
        request: &GenerationRequest,
    ) -> ApiResult<ChunkStream> {
        let body = WireRequest {
            contents: &request.contents,
            system_instruction: SystemInstruction {
                parts: vec![Part::Text {
                    text: request.system_instruction.clone(),
                }],
            },
        };

        tracing::debug!(
            "Opening generation stream: {} contents, model={}",
            request.contents.len(),
            self.model
        );

        let mut builder = self
            .client
            .post(self.stream_url())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-goog-api-key", key);
        }
        if let Identity::Anonymous { anonymous_id } = identity {
            builder = builder.header(super::backend::ANONYMOUS_ID_HEADER, anonymous_id);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("Generation request failed: {}", e);
            ApiError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Generative endpoint returned {}: {}", status, error_text);
            let message = serde_json::from_str::<Value>(&error_text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            return Err(ApiError::application(status.as_u16(), message));
        }

        let chunks = sse::data_stream(response.bytes_stream())
            .map(|item| item.and_then(|payload| chunk_text(&payload)))
            .filter(|item| {
                let keep = !matches!(item, Ok(text) if text.is_empty());
                futures::future::ready(keep)
            });

        Ok(Box::pin(chunks))
    }
}
