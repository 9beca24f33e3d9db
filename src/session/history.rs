//! Ordered transcript of the active conversation
//!
//! Turns are only ever appended. The single exception to immutability is
//! the in-flight streamed turn, whose text grows until it is completed or
//! failed, and the `hide` flag, which can be toggled on any turn.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::{ChatMessageRecord, FileRef, MessageContent, WireRole};
use crate::error::{EstimateError, Result};
use crate::invoice::{self, Invoice};

static NEXT_HISTORY_ID: AtomicU64 = AtomicU64::new(1);

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// The person asking for an estimate
    User,
    /// The model
    Assistant,
    /// Local marker for an inline platform picker; never persisted or sent
    PlatformSelection,
}

impl Role {
    /// Backend spelling, `None` for local-only roles
    pub fn to_wire(self) -> Option<WireRole> {
        match self {
            Self::User => Some(WireRole::User),
            Self::Assistant => Some(WireRole::Ai),
            Self::PlatformSelection => None,
        }
    }
}

impl From<WireRole> for Role {
    fn from(role: WireRole) -> Self {
        match role {
            WireRole::User => Self::User,
            WireRole::Ai => Self::Assistant,
        }
    }
}

/// Lifecycle of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Streaming; text may still grow
    InProgress,
    /// Sealed
    Completed,
    /// Stream ended early; kept for display only
    Failed,
}

/// One message in the transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    role: Role,
    text: String,
    files: Vec<FileRef>,
    hide: bool,
    status: TurnStatus,
    invoice: Option<Invoice>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            files: Vec::new(),
            hide: false,
            status: TurnStatus::Completed,
            invoice: None,
        }
    }

    /// A completed user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// A completed assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// An inline platform picker marker
    pub fn platform_selection() -> Self {
        Self::new(Role::PlatformSelection, "")
    }

    /// Attach files, keeping their order
    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    /// Keep the turn for context but do not display it
    pub fn hidden(mut self) -> Self {
        self.hide = true;
        self
    }

    /// Attach a parsed invoice
    pub fn with_invoice(mut self, invoice: Option<Invoice>) -> Self {
        self.invoice = invoice;
        self
    }

    /// Rebuild a turn from a backend record
    ///
    /// Older assistant messages may not carry the parsed invoice; it is
    /// re-extracted from the text in that case.
    pub fn from_record(record: &ChatMessageRecord) -> Self {
        let content = MessageContent::from_value(&record.content);
        let role = Role::from(record.role);
        let invoice = match content.invoice {
            Some(invoice) => Some(invoice),
            None if role == Role::Assistant => {
                invoice::extract_invoice(&content.text).ok().flatten()
            }
            None => None,
        };
        Self {
            role,
            text: content.text,
            files: content.files,
            hide: content.hide,
            status: TurnStatus::Completed,
            invoice,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Raw text, including any embedded invoice block
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn files(&self) -> &[FileRef] {
        &self.files
    }

    pub fn is_hidden(&self) -> bool {
        self.hide
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        self.invoice.as_ref()
    }

    /// Text with embedded invoice blocks removed
    pub fn display_text(&self) -> String {
        invoice::strip_invoice_blocks(&self.text)
    }

    /// Content as written to the backend
    pub fn to_content(&self) -> MessageContent {
        MessageContent {
            text: self.text.clone(),
            files: self.files.clone(),
            hide: self.hide,
            invoice: self.invoice.clone(),
        }
    }
}

/// Refers to the in-flight turn of one particular history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle {
    history_id: u64,
    index: usize,
}

impl StreamHandle {
    /// Position of the streamed turn
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Append-only transcript
#[derive(Debug)]
pub struct MessageHistory {
    id: u64,
    turns: Vec<Turn>,
    streaming: Option<usize>,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self {
            id: NEXT_HISTORY_ID.fetch_add(1, Ordering::Relaxed),
            turns: Vec::new(),
            streaming: None,
        }
    }

    /// Restore a transcript from backend records, oldest first
    pub fn from_records(records: &[ChatMessageRecord]) -> Self {
        let mut history = Self::new();
        history.hydrate(records);
        history
    }

    /// Append backend records as completed turns
    pub fn hydrate(&mut self, records: &[ChatMessageRecord]) {
        self.turns.extend(records.iter().map(Turn::from_record));
    }

    /// Append a turn and return its index
    pub fn append(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    /// Open an empty in-progress turn
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::StreamInProgress` if a turn is already
    /// streaming
    pub fn begin_streaming_turn(&mut self, role: Role) -> Result<StreamHandle> {
        if self.streaming.is_some() {
            return Err(EstimateError::StreamInProgress.into());
        }
        let mut turn = Turn::new(role, String::new());
        turn.status = TurnStatus::InProgress;
        let index = self.append(turn);
        self.streaming = Some(index);
        Ok(StreamHandle {
            history_id: self.id,
            index,
        })
    }

    /// Append a chunk to the in-progress turn
    ///
    /// # Errors
    ///
    /// Returns `EstimateError::UnknownTurn` if `handle` is not the live
    /// stream of this history
    pub fn append_to_streaming_turn(&mut self, handle: StreamHandle, chunk: &str) -> Result<()> {
        let index = self.live(handle)?;
        self.turns[index].text.push_str(chunk);
        Ok(())
    }

    /// Seal the in-progress turn
    pub fn complete_streaming_turn(
        &mut self,
        handle: StreamHandle,
        invoice: Option<Invoice>,
    ) -> Result<usize> {
        let index = self.live(handle)?;
        let turn = &mut self.turns[index];
        turn.status = TurnStatus::Completed;
        turn.invoice = invoice;
        self.streaming = None;
        Ok(index)
    }

    /// Mark the in-progress turn failed, keeping its partial text
    pub fn fail_streaming_turn(&mut self, handle: StreamHandle) -> Result<usize> {
        let index = self.live(handle)?;
        self.turns[index].status = TurnStatus::Failed;
        self.streaming = None;
        Ok(index)
    }

    /// Fail whatever turn is streaming, if any
    pub fn abort_in_flight(&mut self) -> Option<usize> {
        let index = self.streaming.take()?;
        self.turns[index].status = TurnStatus::Failed;
        tracing::debug!(turn = index, "Aborted in-flight turn");
        Some(index)
    }

    /// Flip the `hide` flag and return the new value
    pub fn toggle_visibility(&mut self, index: usize) -> Result<bool> {
        let turn = self
            .turns
            .get_mut(index)
            .ok_or_else(|| EstimateError::UnknownTurn(format!("no turn at index {}", index)))?;
        turn.hide = !turn.hide;
        Ok(turn.hide)
    }

    /// All turns in append order
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Whether a turn is streaming
    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// Turns that may be sent to the backend or the model: completed and
    /// not local-only
    pub fn persistable_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns
            .iter()
            .filter(|t| t.status == TurnStatus::Completed && t.role.to_wire().is_some())
    }

    /// Most recent invoice in the conversation
    pub fn latest_invoice(&self) -> Option<&Invoice> {
        self.turns.iter().rev().find_map(Turn::invoice)
    }

    fn live(&self, handle: StreamHandle) -> Result<usize> {
        if handle.history_id != self.id || self.streaming != Some(handle.index) {
            return Err(EstimateError::UnknownTurn(format!(
                "turn {} is not streaming in this conversation",
                handle.index
            ))
            .into());
        }
        Ok(handle.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(history: &MessageHistory) -> Vec<&str> {
        history.turns().iter().map(Turn::text).collect()
    }

    #[test]
    fn test_append_preserves_call_order() {
        let mut history = MessageHistory::new();
        history.append(Turn::user("one"));
        let handle = history.begin_streaming_turn(Role::Assistant).unwrap();
        history.append_to_streaming_turn(handle, "tw").unwrap();
        history.append_to_streaming_turn(handle, "o").unwrap();
        history.complete_streaming_turn(handle, None).unwrap();
        history.append(Turn::platform_selection());
        history.append(Turn::user("three"));

        assert_eq!(texts(&history), vec!["one", "two", "", "three"]);
        assert_eq!(history.turns()[1].status(), TurnStatus::Completed);
    }

    #[test]
    fn test_toggle_keeps_order_and_count() {
        let mut history = MessageHistory::new();
        history.append(Turn::user("a"));
        history.append(Turn::assistant("b"));
        assert!(history.toggle_visibility(0).unwrap());
        assert!(!history.toggle_visibility(0).unwrap());
        assert!(history.toggle_visibility(1).unwrap());
        assert_eq!(texts(&history), vec!["a", "b"]);
        assert!(history.turns()[1].is_hidden());
        assert!(history.toggle_visibility(2).is_err());
    }

    #[test]
    fn test_second_stream_is_refused() {
        let mut history = MessageHistory::new();
        let _handle = history.begin_streaming_turn(Role::Assistant).unwrap();
        let err = history.begin_streaming_turn(Role::Assistant).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EstimateError>(),
            Some(EstimateError::StreamInProgress)
        ));
    }

    #[test]
    fn test_sealed_turn_rejects_chunks() {
        let mut history = MessageHistory::new();
        let handle = history.begin_streaming_turn(Role::Assistant).unwrap();
        history.complete_streaming_turn(handle, None).unwrap();
        assert!(history.append_to_streaming_turn(handle, "late").is_err());
        assert_eq!(history.turns()[0].text(), "");
    }

    #[test]
    fn test_handle_from_other_history_is_rejected() {
        let mut a = MessageHistory::new();
        let mut b = MessageHistory::new();
        let handle = a.begin_streaming_turn(Role::Assistant).unwrap();
        let _other = b.begin_streaming_turn(Role::Assistant).unwrap();
        assert!(b.append_to_streaming_turn(handle, "leak").is_err());
        assert_eq!(b.turns()[0].text(), "");
    }

    #[test]
    fn test_failed_turn_is_visible_but_not_persistable() {
        let mut history = MessageHistory::new();
        history.append(Turn::user("hi"));
        let handle = history.begin_streaming_turn(Role::Assistant).unwrap();
        history.append_to_streaming_turn(handle, "partial").unwrap();
        assert_eq!(history.abort_in_flight(), Some(1));
        assert!(!history.is_streaming());
        assert_eq!(history.turns()[1].status(), TurnStatus::Failed);
        assert_eq!(history.turns()[1].text(), "partial");

        let persisted: Vec<_> = history.persistable_turns().map(Turn::text).collect();
        assert_eq!(persisted, vec!["hi"]);
        assert_eq!(history.abort_in_flight(), None);
    }

    #[test]
    fn test_platform_selection_is_local_only() {
        let mut history = MessageHistory::new();
        history.append(Turn::platform_selection());
        history.append(Turn::user("web").hidden());
        let persisted: Vec<_> = history.persistable_turns().collect();
        assert_eq!(persisted.len(), 1);
        assert!(persisted[0].is_hidden());
    }

    #[test]
    fn test_from_records_restores_roles_and_invoice() {
        let records: Vec<ChatMessageRecord> = serde_json::from_value(json!([
            {"role": "USER", "content": "Need a shop"},
            {"role": "AI", "content": {"text": "Estimate:\n<script type=\"application/json\">{\"project\":\"Shop\",\"invoiceGroup\":[{\"category\":\"Web\",\"items\":[{\"feature\":\"Cart\",\"amount\":100,\"duration\":1}]}],\"total\":{\"amount\":100,\"duration\":1}}</script>"}}
        ]))
        .unwrap();
        let history = MessageHistory::from_records(&records);
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].role(), Role::User);
        assert_eq!(history.turns()[1].role(), Role::Assistant);
        assert_eq!(history.turns()[1].display_text(), "Estimate:");
        assert_eq!(history.latest_invoice().unwrap().project, "Shop");
    }
}
