//! Session summaries for navigation
//!
//! An optimistic, eventually consistent copy of the backend's session list.
//! New sessions are pushed to the head as soon as they are created; the
//! full list is only refetched after [`SessionListCache::invalidate`].

use chrono::Local;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::store::SessionEvent;
use crate::api::types::BACKEND_TIME_FORMAT;
use crate::api::{ApiResult, ChatBackend, ChatSession, Identity, SessionIndex};

/// Cached session list
#[derive(Debug)]
pub struct SessionListCache {
    entries: Vec<ChatSession>,
    stale: bool,
    next_offset: u32,
    placeholder: String,
}

impl SessionListCache {
    /// Create an empty, stale cache. `placeholder` is shown for untitled
    /// sessions.
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            stale: true,
            next_offset: 0,
            placeholder: placeholder.into(),
        }
    }

    /// Insert a newly created session at the head
    ///
    /// Returns `false` if a session with the same uuid is already listed.
    pub fn upsert_from_creation(&mut self, session: &ChatSession) -> bool {
        if self.entries.iter().any(|s| s.uuid == session.uuid) {
            return false;
        }
        self.entries.insert(0, session.clone());
        self.next_offset += 1;
        tracing::debug!(uuid = %session.uuid, "Added created session to list");
        true
    }

    /// Force the next [`load`](Self::load) to refetch
    pub fn invalidate(&mut self) {
        self.stale = true;
        tracing::debug!("Session list invalidated");
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// React to one session store event
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Created(session) => {
                self.upsert_from_creation(session);
            }
            SessionEvent::Reset => self.invalidate(),
            SessionEvent::Selected(_) | SessionEvent::Cleared | SessionEvent::RolledBack => {}
        }
    }

    /// Drain pending store events
    ///
    /// If events were dropped the cache cannot know what it missed and is
    /// invalidated.
    pub fn sync(&mut self, events: &mut broadcast::Receiver<SessionEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.apply(&event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Session events lagged");
                    self.invalidate();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Cached entries, refetching the first page when stale
    pub async fn load(
        &mut self,
        backend: &dyn ChatBackend,
        identity: &Identity,
    ) -> ApiResult<&[ChatSession]> {
        if self.stale {
            let page = backend.list_sessions(identity, 0).await?;
            tracing::debug!(count = page.len(), "Fetched session list");
            self.next_offset = page.len() as u32;
            self.entries = page;
            self.stale = false;
        }
        Ok(&self.entries)
    }

    /// Fetch and append the next page, returning how many entries were added
    pub async fn load_more(
        &mut self,
        backend: &dyn ChatBackend,
        identity: &Identity,
    ) -> ApiResult<usize> {
        if self.stale {
            return self.load(backend, identity).await.map(<[ChatSession]>::len);
        }
        let page = backend.list_sessions(identity, self.next_offset).await?;
        self.next_offset += page.len() as u32;
        let before = self.entries.len();
        for session in page {
            if !self.entries.iter().any(|s| s.uuid == session.uuid) {
                self.entries.push(session);
            }
        }
        Ok(self.entries.len() - before)
    }

    /// Move a session to the head after a new message
    pub fn touch(&mut self, index: SessionIndex, preview: Option<String>) {
        let Some(pos) = self.entries.iter().position(|s| s.index == Some(index)) else {
            return;
        };
        let mut session = self.entries.remove(pos);
        session.update_time = Some(Local::now().format(BACKEND_TIME_FORMAT).to_string());
        if let Some(preview) = preview {
            session.last_message = Some(Value::String(preview));
        }
        self.entries.insert(0, session);
    }

    pub fn entries(&self) -> &[ChatSession] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Title to show for `session`
    pub fn display_title<'a>(&'a self, session: &'a ChatSession) -> &'a str {
        session.display_title(&self.placeholder)
    }
}
