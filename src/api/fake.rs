//! In-process fakes for the backend and the generative endpoint
//!
//! [`FakeBackend`] keeps sessions and messages in memory and behaves like
//! the real backend for the happy path: a message without a session index
//! mints a new session. Individual calls can be scripted to fail.
//!
//! [`FakeGenerative`] replays scripted replies. A reply can also be fed by
//! hand through a [`FakeStreamHandle`], which lets a test interleave
//! chunks with other actions such as switching sessions.
//!
//! # Example
//!
//! ```
//! use estimate_chat::api::fake::FakeGenerative;
//! use estimate_chat::api::{GenerationRequest, GenerativeClient, Identity};
//! use futures::StreamExt;
//!
//! # tokio_test::block_on(async {
//! let generative = FakeGenerative::new();
//! generative.push_chunks(["Hello", " there"]);
//!
//! let identity = Identity::Anonymous { anonymous_id: "a".into() };
//! let request = GenerationRequest { system_instruction: String::new(), contents: vec![] };
//! let chunks: Vec<_> = generative
//!     .stream_generate(&identity, &request)
//!     .await
//!     .unwrap()
//!     .collect()
//!     .await;
//! assert_eq!(chunks.len(), 2);
//! # });
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::backend::ChatBackend;
use super::generative::{ChunkStream, GenerationRequest, GenerativeClient};
use super::types::{
    ChatMessageRecord, ChatSession, CreateMessageRequest, CreateMessageResponse, Identity,
    SessionIndex,
};
use super::{ApiError, ApiResult};

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug)]
struct BackendState {
    sessions: Vec<ChatSession>,
    messages: HashMap<SessionIndex, Vec<ChatMessageRecord>>,
    page_size: usize,
    create_script: VecDeque<ApiResult<CreateMessageResponse>>,
    list_failure: Option<ApiError>,
    created: Vec<CreateMessageRequest>,
    next_session: i64,
}

/// In-memory [`ChatBackend`]
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Create an empty backend; minted sessions start at index 1
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                sessions: Vec::new(),
                messages: HashMap::new(),
                page_size: DEFAULT_PAGE_SIZE,
                create_script: VecDeque::new(),
                list_failure: None,
                created: Vec::new(),
                next_session: 1,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the session list, most recent first
    pub fn set_sessions(&self, sessions: Vec<ChatSession>) {
        self.state().sessions = sessions;
    }

    /// Replace the messages of one session
    pub fn set_messages(&self, session: SessionIndex, messages: Vec<ChatMessageRecord>) {
        self.state().messages.insert(session, messages);
    }

    /// Page size for both list calls
    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size.max(1);
    }

    /// Answer the next create call with `response` instead of the default
    /// behaviour
    pub fn push_create_response(&self, response: ApiResult<CreateMessageResponse>) {
        self.state().create_script.push_back(response);
    }

    /// Make the next create call fail
    pub fn fail_next_create(&self, error: ApiError) {
        self.push_create_response(Err(error));
    }

    /// Make every list call fail until cleared with `None`
    pub fn set_list_failure(&self, error: Option<ApiError>) {
        self.state().list_failure = error;
    }

    /// Every create request received, in order
    pub fn created_requests(&self) -> Vec<CreateMessageRequest> {
        self.state().created.clone()
    }

    /// Messages stored for `session`
    pub fn messages(&self, session: SessionIndex) -> Vec<ChatMessageRecord> {
        self.state()
            .messages
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }

    /// Sessions currently listed
    pub fn sessions(&self) -> Vec<ChatSession> {
        self.state().sessions.clone()
    }
}

fn page<T: Clone>(items: &[T], offset: u32, page_size: usize) -> Vec<T> {
    items
        .iter()
        .skip(offset as usize)
        .take(page_size)
        .cloned()
        .collect()
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn create_message(
        &self,
        _identity: &Identity,
        request: &CreateMessageRequest,
    ) -> ApiResult<CreateMessageResponse> {
        let mut state = self.state();
        state.created.push(request.clone());

        if let Some(scripted) = state.create_script.pop_front() {
            return scripted;
        }

        let chat_session = match request.session_index {
            Some(_) => None,
            None => {
                let index = SessionIndex(state.next_session);
                state.next_session += 1;
                let session = ChatSession {
                    index: Some(index),
                    uuid: format!("fake-session-{}", index),
                    title: request.title.clone(),
                    created_time: None,
                    update_time: None,
                    last_message: None,
                };
                state.sessions.insert(0, session.clone());
                Some(session)
            }
        };

        let session_index = request
            .session_index
            .or_else(|| chat_session.as_ref().and_then(|s| s.index));
        let chat_message = ChatMessageRecord {
            index: None,
            role: request.role,
            session_index,
            content: request.content.clone(),
            created_time: None,
        };
        if let Some(index) = session_index {
            state
                .messages
                .entry(index)
                .or_default()
                .push(chat_message.clone());
        }

        Ok(CreateMessageResponse {
            chat_message,
            chat_session,
        })
    }

    async fn list_sessions(
        &self,
        _identity: &Identity,
        offset: u32,
    ) -> ApiResult<Vec<ChatSession>> {
        let state = self.state();
        if let Some(error) = &state.list_failure {
            return Err(error.clone());
        }
        Ok(page(&state.sessions, offset, state.page_size))
    }

    async fn list_messages(
        &self,
        _identity: &Identity,
        session: SessionIndex,
        offset: u32,
    ) -> ApiResult<Vec<ChatMessageRecord>> {
        let state = self.state();
        if let Some(error) = &state.list_failure {
            return Err(error.clone());
        }
        let messages = state.messages.get(&session).map(Vec::as_slice).unwrap_or_default();
        Ok(page(messages, offset, state.page_size))
    }
}

enum ScriptedReply {
    Items(Vec<ApiResult<String>>),
    OpenError(ApiError),
    Channel(mpsc::UnboundedReceiver<ApiResult<String>>),
}

#[derive(Default)]
struct GenerativeState {
    script: VecDeque<ScriptedReply>,
    requests: Vec<GenerationRequest>,
}

/// Scripted [`GenerativeClient`]
///
/// Replies are consumed in the order they were pushed. A call with
/// nothing scripted fails to open.
#[derive(Default)]
pub struct FakeGenerative {
    state: Mutex<GenerativeState>,
}

impl FakeGenerative {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GenerativeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script a reply that yields `chunks` and ends
    pub fn push_chunks<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = chunks.into_iter().map(|c| Ok(c.into())).collect();
        self.state().script.push_back(ScriptedReply::Items(items));
    }

    /// Script a reply from explicit items, errors included
    pub fn push_items(&self, items: Vec<ApiResult<String>>) {
        self.state().script.push_back(ScriptedReply::Items(items));
    }

    /// Script a reply that fails before the first chunk
    pub fn fail_next_open(&self, error: ApiError) {
        self.state().script.push_back(ScriptedReply::OpenError(error));
    }

    /// Script a reply fed by hand through the returned handle
    pub fn push_channel(&self) -> FakeStreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().script.push_back(ScriptedReply::Channel(rx));
        FakeStreamHandle { tx }
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.state().requests.clone()
    }
}

impl std::fmt::Debug for FakeGenerative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("FakeGenerative")
            .field("scripted", &state.script.len())
            .field("requests", &state.requests.len())
            .finish()
    }
}

#[async_trait]
impl GenerativeClient for FakeGenerative {
    async fn stream_generate(
        &self,
        _identity: &Identity,
        request: &GenerationRequest,
    ) -> ApiResult<ChunkStream> {
        let mut state = self.state();
        state.requests.push(request.clone());

        match state.script.pop_front() {
            Some(ScriptedReply::Items(items)) => Ok(Box::pin(futures::stream::iter(items))),
            Some(ScriptedReply::OpenError(error)) => Err(error),
            Some(ScriptedReply::Channel(rx)) => Ok(Box::pin(futures::stream::unfold(
                rx,
                |mut rx| async move {
                    let item = rx.recv().await?;
                    Some((item, rx))
                },
            ))),
            None => Err(ApiError::Transport("no scripted reply".into())),
        }
    }
}

/// Feeds one hand-driven reply
///
/// Dropping the handle ends the stream.
#[derive(Debug, Clone)]
pub struct FakeStreamHandle {
    tx: mpsc::UnboundedSender<ApiResult<String>>,
}

impl FakeStreamHandle {
    /// Deliver a chunk; returns `false` once the stream has been dropped
    pub fn send(&self, chunk: impl Into<String>) -> bool {
        self.tx.send(Ok(chunk.into())).is_ok()
    }

    /// Deliver a mid-stream failure
    pub fn fail(&self, error: ApiError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }
}
