//! Current-session tracking
//!
//! The store knows which backend session the user is looking at. Every
//! switch bumps an epoch and cancels the previous [`CancellationToken`], so
//! a stream opened before the switch can tell it has been orphaned.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::accumulator::StreamOrigin;
use crate::api::{ApiError, ChatSession, SessionIndex};
use crate::error::{EstimateError, Result};

const EVENT_CAPACITY: usize = 64;

/// Published on every store mutation
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An existing session became current
    Selected(SessionIndex),
    /// The user started a new conversation; no session yet
    Cleared,
    /// The backend minted a session for the first message
    Created(ChatSession),
    /// Session creation failed mid-send
    RolledBack,
    /// The identity changed; cached lists are no longer valid
    Reset,
}

/// Tracks the current session
#[derive(Debug)]
pub struct SessionStore {
    current: Option<SessionIndex>,
    title: Option<String>,
    epoch: u64,
    cancel: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            current: None,
            title: None,
            epoch: 0,
            cancel: CancellationToken::new(),
            events,
        }
    }

    /// Current session, `None` before the first message of a new chat
    pub fn current(&self) -> Option<SessionIndex> {
        self.current
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Make `index` current and return whether anything changed
    ///
    /// Messages are not fetched here.
    pub fn select(&mut self, index: SessionIndex) -> bool {
        if self.current == Some(index) {
            return false;
        }
        self.current = Some(index);
        self.title = None;
        self.bump();
        tracing::info!(session = %index, "Selected session");
        self.publish(SessionEvent::Selected(index));
        true
    }

    /// Clear the current session; the next send creates one
    pub fn start_new(&mut self) {
        self.current = None;
        self.title = None;
        self.bump();
        tracing::info!("Started new conversation");
        self.publish(SessionEvent::Cleared);
    }

    /// Adopt the session the backend minted for the first message
    ///
    /// This continues the same conversation, so streams already stamped with
    /// the current epoch stay valid.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Malformed` if the session has no index
    pub fn on_session_created(&mut self, session: &ChatSession) -> Result<()> {
        let index = session
            .index
            .ok_or_else(|| {
                EstimateError::from(ApiError::Malformed("created session has no index".into()))
            })?;
        self.current = Some(index);
        self.title = session.title.clone();
        tracing::info!(session = %index, uuid = %session.uuid, "Session created");
        self.publish(SessionEvent::Created(session.clone()));
        Ok(())
    }

    /// Return to "no current session" after a failed creation
    pub fn rollback_creation(&mut self) {
        self.current = None;
        self.title = None;
        self.bump();
        tracing::warn!("Session creation failed; rolled back to a new conversation");
        self.publish(SessionEvent::RolledBack);
    }

    /// Forget everything; used when the identity changes
    pub fn reset(&mut self) {
        self.current = None;
        self.title = None;
        self.bump();
        tracing::info!("Session store reset");
        self.publish(SessionEvent::Reset);
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Token cancelled by the next switch
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stamp for a stream opened now
    pub fn origin(&self) -> StreamOrigin {
        StreamOrigin {
            epoch: self.epoch,
            session: self.current,
        }
    }

    /// Whether a stream stamped with `origin` still belongs here
    pub fn is_current(&self, origin: &StreamOrigin) -> bool {
        origin.epoch == self.epoch && !self.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn bump(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.epoch += 1;
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No session event subscribers");
        }
    }
}
