//! Wire types shared by the backend client and the chat context

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::invoice::Invoice;

/// Backend timestamp format, e.g. `2025-03-01 14:05:00`
pub const BACKEND_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Integer session identifier assigned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIndex(pub i64);

impl std::fmt::Display for SessionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is making the call
///
/// Authenticated identities carry a bearer token and are not rate limited.
/// Anonymous identities carry the locally persisted identity token used to
/// attribute usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Logged-in user
    Authenticated {
        /// Bearer token
        token: String,
    },
    /// Not logged in
    Anonymous {
        /// Client-generated identity token
        anonymous_id: String,
    },
}

impl Identity {
    /// Whether the quota applies
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Message author as the backend spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireRole {
    /// `USER`
    #[serde(rename = "USER")]
    User,
    /// `AI`
    #[serde(rename = "AI")]
    Ai,
}

/// Session summary as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Backend identifier, absent until the first message persists
    #[serde(default)]
    pub index: Option<SessionIndex>,
    /// Stable opaque identifier
    pub uuid: String,
    /// Derived by the backend from content; `None` until then
    #[serde(default)]
    pub title: Option<String>,
    /// `YYYY-MM-DD HH:mm:ss`
    #[serde(default)]
    pub created_time: Option<String>,
    /// `YYYY-MM-DD HH:mm:ss`
    #[serde(default)]
    pub update_time: Option<String>,
    /// Preview of the most recent turn
    #[serde(default)]
    pub last_message: Option<Value>,
}

impl ChatSession {
    /// Title for display, with `placeholder` standing in for untitled sessions
    pub fn display_title<'a>(&'a self, placeholder: &'a str) -> &'a str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(placeholder)
    }

    /// Parsed `update_time`, if well formed
    pub fn updated_at(&self) -> Option<NaiveDateTime> {
        self.update_time.as_deref().and_then(parse_backend_time)
    }

    /// Plain-text preview of `last_message`
    pub fn last_message_preview(&self) -> Option<String> {
        match self.last_message.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => {
                let content = MessageContent::from_value(other.get("content").unwrap_or(other));
                (!content.text.is_empty()).then_some(content.text)
            }
        }
    }
}

/// Parse a backend timestamp, `None` if it does not match the format
pub fn parse_backend_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), BACKEND_TIME_FORMAT).ok()
}

/// Attached file reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Location the generative endpoint can read from
    pub uri: String,
    /// MIME type, e.g. `application/pdf`
    pub mime_type: String,
    /// Name shown next to the turn
    pub display_name: String,
}

/// Structured message content written by this client
///
/// The backend treats `content` as opaque JSON. Older messages may hold a
/// bare string, which reads as text with no attachments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hide: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<Invoice>,
}

impl MessageContent {
    /// Read content leniently from whatever the backend stored
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self {
                text: text.clone(),
                ..Default::default()
            },
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                tracing::warn!("Unreadable message content, keeping text only: {}", e);
                Self {
                    text: value
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    ..Default::default()
                }
            }),
            _ => Self::default(),
        }
    }
}

/// Message as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    #[serde(default)]
    pub index: Option<i64>,
    pub role: WireRole,
    #[serde(default)]
    pub session_index: Option<SessionIndex>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub created_time: Option<String>,
}

/// Body of the create-message call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub role: WireRole,
    /// Target session; omitted to have the backend mint a new one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_index: Option<SessionIndex>,
    /// Proposed title, only meaningful without `session_index`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: Value,
}

/// Result of the create-message call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResponse {
    pub chat_message: ChatMessageRecord,
    /// Present only when the call minted a new session
    #[serde(default)]
    pub chat_session: Option<ChatSession>,
}
