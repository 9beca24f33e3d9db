//! Conversation orchestration
//!
//! [`ChatSessionContext`] owns one instance of every session component and
//! is the only thing user actions talk to. Build one per front end; tests
//! build as many independent instances as they like.
//!
//! # Send flow
//!
//! 1. Refuse if a reply is still streaming.
//! 2. Spend one quota unit; an exhausted quota is an outcome, not an error.
//! 3. Persist the user message. Without a current session the backend
//!    mints one; if that fails the store rolls back to "no session".
//! 4. Append the user turn and open a streaming assistant turn.
//! 5. Return a [`ReplyStream`]; feed it through [`ChatSessionContext::drive_reply`]
//!    or step it by hand with [`ChatSessionContext::apply_chunk`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use super::accumulator::{
    CompletedReply, ReplyOutcome, ReplyStream, StreamAccumulator, StreamEvent,
};
use super::history::{MessageHistory, Role, Turn, TurnStatus};
use super::list_cache::SessionListCache;
use super::quota::{self, QuotaDecision, QuotaGate};
use super::store::{SessionEvent, SessionStore};
use crate::api::generative::{Content, ContentRole, Part};
use crate::api::{
    ApiError, ApiResult, ChatBackend, ChatMessageRecord, ChatSession, CreateMessageRequest,
    FileRef, GenerationRequest, GenerativeClient, HttpChatBackend, HttpGenerativeClient, Identity,
    MessageContent, SessionIndex, WireRole,
};
use crate::config::{ChatConfig, Config};
use crate::error::{EstimateError, Result};
use crate::prompts::PromptBuilder;
use crate::storage::KeyValueStore;

/// Upper bound on transcript pages fetched for one session
const MAX_TRANSCRIPT_PAGES: usize = 500;

/// Result of opening a reply
#[derive(Debug)]
pub enum BeginReply {
    /// The anonymous daily limit is reached; nothing was sent
    QuotaExhausted,
    /// The reply is streaming
    Started(ReplyStream),
}

/// Result of a full send
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The anonymous daily limit is reached; nothing was sent
    QuotaExhausted,
    /// The message was sent and the reply has ended
    Replied(ReplyOutcome),
}

/// What happened to one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Appended to the live turn
    Applied,
    /// The stream no longer belongs to the active conversation
    Dropped,
}

/// Everything a front end needs to run estimate conversations
pub struct ChatSessionContext {
    backend: Arc<dyn ChatBackend>,
    generative: Arc<dyn GenerativeClient>,
    system_instruction: String,
    quota: QuotaGate,
    identity: Identity,
    store: SessionStore,
    history: MessageHistory,
    parked: HashMap<SessionIndex, MessageHistory>,
    cache: SessionListCache,
    events: broadcast::Receiver<SessionEvent>,
    chat: ChatConfig,
}

impl ChatSessionContext {
    /// Assemble a context from its collaborators
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        generative: Arc<dyn GenerativeClient>,
        system_instruction: impl Into<String>,
        quota: QuotaGate,
        identity: Identity,
        chat: ChatConfig,
    ) -> Self {
        let store = SessionStore::new();
        let events = store.subscribe();
        Self {
            backend,
            generative,
            system_instruction: system_instruction.into(),
            quota,
            identity,
            store,
            history: MessageHistory::new(),
            parked: HashMap::new(),
            cache: SessionListCache::new(chat.new_chat_title.clone()),
            events,
            chat,
        }
    }

    /// Build HTTP clients, the prompt and the quota gate from configuration
    ///
    /// The identity is authenticated when `backend.auth_token` is set and
    /// anonymous otherwise.
    pub fn from_config(config: &Config, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let backend = Arc::new(HttpChatBackend::new(&config.backend)?);
        let generative = Arc::new(HttpGenerativeClient::new(&config.generative)?);
        let prompt = PromptBuilder::from_config(&config.prompt, &config.localization)?;
        let identity = match &config.backend.auth_token {
            Some(token) => Identity::Authenticated {
                token: token.clone(),
            },
            None => quota::anonymous_identity(storage.as_ref()),
        };
        let quota = QuotaGate::new(config.quota.daily_limit, storage);

        Ok(Self::new(
            backend,
            generative,
            prompt.system_instruction(),
            quota,
            identity,
            config.chat.clone(),
        ))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Transcript of the active conversation
    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Transcript of a conversation that was switched away from
    pub fn parked_history(&self, session: SessionIndex) -> Option<&MessageHistory> {
        self.parked.get(&session)
    }

    pub fn cache(&self) -> &SessionListCache {
        &self.cache
    }

    /// Calls left today, `None` when not rate limited
    pub fn quota_remaining(&mut self) -> Option<u32> {
        self.quota.remaining(&self.identity)
    }

    /// Session list for navigation
    pub async fn sessions(&mut self) -> ApiResult<&[ChatSession]> {
        self.sync_cache();
        self.cache.load(self.backend.as_ref(), &self.identity).await
    }

    /// Append the next page of sessions
    pub async fn more_sessions(&mut self) -> ApiResult<usize> {
        self.sync_cache();
        self.cache
            .load_more(self.backend.as_ref(), &self.identity)
            .await
    }

    /// Switch identity on login or logout; all conversation state is dropped
    pub fn set_identity(&mut self, identity: Identity) {
        self.history.abort_in_flight();
        self.store.reset();
        self.history = MessageHistory::new();
        self.parked.clear();
        self.identity = identity;
        self.sync_cache();
        tracing::info!(authenticated = self.identity.is_authenticated(), "Identity changed");
    }

    /// Start a new conversation; the next send creates a session
    pub fn start_new_session(&mut self) {
        self.park_active();
        self.store.start_new();
        self.sync_cache();
    }

    /// Make `session` the active conversation
    ///
    /// A stream still running for the previous conversation is cancelled and
    /// its turn marked failed. The transcript is restored from memory when
    /// the session was visited before, otherwise fetched page by page.
    ///
    /// Nothing changes when the transcript cannot be fetched; the previous
    /// conversation stays active and the call can be retried.
    pub async fn select_session(&mut self, session: SessionIndex) -> ApiResult<()> {
        if self.store.current() == Some(session) {
            return Ok(());
        }

        let history = match self.parked.remove(&session) {
            Some(history) => history,
            None => MessageHistory::from_records(&self.fetch_transcript(session).await?),
        };

        self.park_active();
        self.store.select(session);
        self.sync_cache();
        self.history = history;
        Ok(())
    }

    async fn fetch_transcript(&self, session: SessionIndex) -> ApiResult<Vec<ChatMessageRecord>> {
        let mut records = Vec::new();
        let mut page_size = None;
        for _ in 0..MAX_TRANSCRIPT_PAGES {
            let page = self
                .backend
                .list_messages(&self.identity, session, records.len() as u32)
                .await?;
            let len = page.len();
            records.extend(page);
            if len == 0 || page_size.is_some_and(|size| len < size) {
                tracing::debug!(session = %session, messages = records.len(), "Loaded transcript");
                return Ok(records);
            }
            page_size = page_size.or(Some(len));
        }
        tracing::warn!(
            session = %session,
            messages = records.len(),
            "Transcript paging did not end, keeping what was fetched"
        );
        Ok(records)
    }

    /// Flip visibility of a turn in the active transcript
    pub fn toggle_visibility(&mut self, index: usize) -> Result<bool> {
        self.history.toggle_visibility(index)
    }

    /// Insert the inline platform picker marker
    pub fn append_platform_selection(&mut self) -> usize {
        self.history.append(Turn::platform_selection())
    }

    /// Send a user message and open the reply stream
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::StreamInProgress` while a reply is streaming,
    /// and `EstimateError::Api` if the message could not be persisted or
    /// the stream could not be opened
    pub async fn begin_reply(&mut self, text: &str, files: Vec<FileRef>) -> Result<BeginReply> {
        if self.history.is_streaming() {
            return Err(EstimateError::StreamInProgress.into());
        }
        if self.quota.consume(&self.identity) == QuotaDecision::Exhausted {
            return Ok(BeginReply::QuotaExhausted);
        }

        let turn = Turn::user(text).with_files(files);
        let current = self.store.current();
        let request = CreateMessageRequest {
            role: WireRole::User,
            session_index: current,
            title: current.is_none().then(|| self.propose_title(text)),
            content: content_value(&turn.to_content())?,
        };

        let response = match self.backend.create_message(&self.identity, &request).await {
            Ok(response) => response,
            Err(e) => {
                if current.is_none() {
                    self.store.rollback_creation();
                    self.sync_cache();
                }
                return Err(EstimateError::Api(e).into());
            }
        };

        if current.is_none() {
            let created = response
                .chat_session
                .as_ref()
                .ok_or_else(|| ApiError::Malformed("no session was created".into()))
                .and_then(|session| {
                    self.store
                        .on_session_created(session)
                        .map_err(|e| ApiError::Malformed(e.to_string()))
                });
            if let Err(e) = created {
                self.store.rollback_creation();
                self.sync_cache();
                return Err(EstimateError::Api(e).into());
            }
            self.sync_cache();
        }

        self.history.append(turn);
        self.open_reply().await.map(BeginReply::Started)
    }

    /// Ask for a new reply after the previous one failed
    ///
    /// The user message is not sent again; quota is spent again.
    pub async fn regenerate(&mut self) -> Result<BeginReply> {
        if self.history.is_streaming() {
            return Err(EstimateError::StreamInProgress.into());
        }
        let last = self.history.turns().last();
        let retryable = matches!(
            last,
            Some(t) if t.role() == Role::Assistant && t.status() == TurnStatus::Failed
        );
        if !retryable {
            return Err(EstimateError::UnknownTurn("the last reply did not fail".into()).into());
        }
        if self.quota.consume(&self.identity) == QuotaDecision::Exhausted {
            return Ok(BeginReply::QuotaExhausted);
        }
        self.open_reply().await.map(BeginReply::Started)
    }

    /// Apply one chunk unless the stream was orphaned by a switch
    pub fn apply_chunk(&mut self, reply: &mut ReplyStream, chunk: &str) -> ChunkDisposition {
        if !self.store.is_current(&reply.origin()) {
            tracing::warn!(chars = chunk.len(), "Dropping chunk for an inactive conversation");
            return ChunkDisposition::Dropped;
        }
        match reply.accumulator_mut().ingest(&mut self.history, chunk) {
            Ok(()) => ChunkDisposition::Applied,
            Err(e) => {
                tracing::warn!("Dropping chunk: {}", e);
                ChunkDisposition::Dropped
            }
        }
    }

    /// Seal the reply, extract its invoice and persist it
    pub async fn finish_reply(&mut self, reply: ReplyStream) -> ReplyOutcome {
        if !self.store.is_current(&reply.origin()) {
            return ReplyOutcome::Abandoned;
        }
        let mut completed = match reply.into_accumulator().finish(&mut self.history) {
            Ok(completed) => completed,
            Err(e) => {
                tracing::warn!("Reply could not be completed: {}", e);
                return ReplyOutcome::Abandoned;
            }
        };
        self.persist_reply(&mut completed).await;
        ReplyOutcome::Completed(completed)
    }

    /// Mark the reply failed after a stream error
    pub fn fail_reply(&mut self, reply: ReplyStream, error: ApiError) -> ReplyOutcome {
        if !self.store.is_current(&reply.origin()) {
            return ReplyOutcome::Abandoned;
        }
        reply
            .into_accumulator()
            .fail(&mut self.history, error)
            .unwrap_or(ReplyOutcome::Abandoned)
    }

    /// Run a reply to the end
    pub async fn drive_reply(&mut self, reply: ReplyStream) -> ReplyOutcome {
        self.drive_reply_with(reply, |_| {}).await
    }

    /// Run a reply to the end, calling `on_chunk` for every applied chunk
    pub async fn drive_reply_with<F>(
        &mut self,
        mut reply: ReplyStream,
        mut on_chunk: F,
    ) -> ReplyOutcome
    where
        F: FnMut(&str),
    {
        loop {
            match reply.next_event().await {
                StreamEvent::Chunk(chunk) => match self.apply_chunk(&mut reply, &chunk) {
                    ChunkDisposition::Applied => on_chunk(&chunk),
                    ChunkDisposition::Dropped => return ReplyOutcome::Abandoned,
                },
                StreamEvent::Ended => return self.finish_reply(reply).await,
                StreamEvent::Failed(error) => return self.fail_reply(reply, error),
                StreamEvent::Cancelled => {
                    tracing::debug!("Reply cancelled by a conversation switch");
                    return ReplyOutcome::Abandoned;
                }
            }
        }
    }

    /// Send a message and wait for the whole reply
    pub async fn send_message(&mut self, text: &str, files: Vec<FileRef>) -> Result<SendOutcome> {
        match self.begin_reply(text, files).await? {
            BeginReply::QuotaExhausted => Ok(SendOutcome::QuotaExhausted),
            BeginReply::Started(reply) => Ok(SendOutcome::Replied(self.drive_reply(reply).await)),
        }
    }

    async fn open_reply(&mut self) -> Result<ReplyStream> {
        let request = self.generation_request();
        let handle = self.history.begin_streaming_turn(Role::Assistant)?;
        match self.generative.stream_generate(&self.identity, &request).await {
            Ok(stream) => Ok(ReplyStream::new(
                stream,
                self.store.cancellation_token(),
                self.store.origin(),
                StreamAccumulator::new(handle),
            )),
            Err(e) => {
                self.history.fail_streaming_turn(handle)?;
                tracing::error!("Could not open reply stream: {}", e);
                Err(EstimateError::Api(e).into())
            }
        }
    }

    fn generation_request(&self) -> GenerationRequest {
        let contents = self
            .history
            .persistable_turns()
            .filter_map(|turn| {
                let role = match turn.role() {
                    Role::User => ContentRole::User,
                    Role::Assistant => ContentRole::Model,
                    Role::PlatformSelection => return None,
                };
                let mut parts: Vec<Part> = Vec::new();
                if !turn.text().is_empty() {
                    parts.push(Part::Text {
                        text: turn.text().to_string(),
                    });
                }
                parts.extend(turn.files().iter().map(Part::from));
                (!parts.is_empty()).then_some(Content { role, parts })
            })
            .collect();

        GenerationRequest {
            system_instruction: self.system_instruction.clone(),
            contents,
        }
    }

    async fn persist_reply(&mut self, completed: &mut CompletedReply) {
        let Some(session) = self.store.current() else {
            return;
        };
        let request = match reply_request(session, completed) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(session = %session, "Reply could not be encoded: {}", e);
                completed.persist_error = Some(e);
                return;
            }
        };
        match self.backend.create_message(&self.identity, &request).await {
            Ok(_) => {
                let preview = crate::invoice::strip_invoice_blocks(&completed.text);
                self.cache.touch(session, Some(preview));
            }
            Err(e) => {
                tracing::warn!(session = %session, "Reply was not saved: {}", e);
                completed.persist_error = Some(e);
            }
        }
    }

    fn park_active(&mut self) {
        if self.history.abort_in_flight().is_some() {
            tracing::info!("Cancelled reply of the previous conversation");
        }
        let history = std::mem::take(&mut self.history);
        match self.store.current() {
            Some(session) => {
                self.parked.insert(session, history);
            }
            None => tracing::debug!(turns = history.len(), "Discarding unsaved conversation"),
        }
    }

    fn propose_title(&self, text: &str) -> String {
        let first_line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
        let title: String = first_line.chars().take(self.chat.title_max_chars).collect();
        if title.is_empty() {
            self.chat.new_chat_title.clone()
        } else {
            title
        }
    }

    fn sync_cache(&mut self) {
        self.cache.sync(&mut self.events);
    }
}

fn content_value(content: &MessageContent) -> Result<Value> {
    Ok(serde_json::to_value(content).map_err(EstimateError::from)?)
}

/// Backend request saving a finished assistant turn
fn reply_request(
    session: SessionIndex,
    completed: &CompletedReply,
) -> ApiResult<CreateMessageRequest> {
    let content = MessageContent {
        text: completed.text.clone(),
        files: Vec::new(),
        hide: false,
        invoice: completed.invoice.clone(),
    };
    let content = content_value(&content)
        .map_err(|e| ApiError::Malformed(format!("reply content is not serializable: {}", e)))?;
    Ok(CreateMessageRequest {
        role: WireRole::Ai,
        session_index: Some(session),
        title: None,
        content,
    })
}
