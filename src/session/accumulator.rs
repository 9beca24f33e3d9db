//! Streaming response accumulation
//!
//! A [`ReplyStream`] pairs the generative chunk stream with the session
//! store's cancellation token and the origin stamp of the turn it feeds.
//! Chunks go verbatim into the live turn and into a raw buffer; when the
//! stream ends the buffer is scanned for an embedded invoice.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::history::{MessageHistory, StreamHandle};
use crate::api::{ApiError, ChunkStream, SessionIndex};
use crate::error::Result;
use crate::invoice::{self, Invoice};

/// Where a stream was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOrigin {
    /// Session store epoch at the time the stream opened
    pub epoch: u64,
    /// Session the stream belongs to
    pub session: Option<SessionIndex>,
}

/// A finished assistant turn
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedReply {
    /// Index of the turn in the history
    pub turn: usize,
    /// Full raw text as streamed
    pub text: String,
    /// Parsed invoice, if the text carried a valid one
    pub invoice: Option<Invoice>,
    /// Why an embedded block was rejected
    pub invoice_error: Option<String>,
    /// Set when the turn could not be saved to the backend
    pub persist_error: Option<ApiError>,
}

/// How a reply ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// The stream ended normally
    Completed(CompletedReply),
    /// The stream broke; the turn is marked failed and may be regenerated
    Failed {
        error: ApiError,
        turn: usize,
    },
    /// The conversation changed while streaming; nothing was applied
    Abandoned,
}

/// Collects chunks for one streamed turn
#[derive(Debug)]
pub struct StreamAccumulator {
    handle: StreamHandle,
    raw: String,
}

impl StreamAccumulator {
    pub fn new(handle: StreamHandle) -> Self {
        Self {
            handle,
            raw: String::new(),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    /// Text received so far
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Append a chunk to the live turn and the raw buffer
    pub fn ingest(&mut self, history: &mut MessageHistory, chunk: &str) -> Result<()> {
        history.append_to_streaming_turn(self.handle, chunk)?;
        self.raw.push_str(chunk);
        Ok(())
    }

    /// Seal the turn and extract its invoice
    ///
    /// A malformed invoice block does not fail the turn; the text is kept
    /// and the reason is reported in [`CompletedReply::invoice_error`].
    pub fn finish(self, history: &mut MessageHistory) -> Result<CompletedReply> {
        let (invoice, invoice_error) = match invoice::extract_invoice(&self.raw) {
            Ok(invoice) => (invoice, None),
            Err(e) => {
                tracing::warn!("Reply carried an invalid invoice block: {}", e);
                (None, Some(e.to_string()))
            }
        };
        let turn = history.complete_streaming_turn(self.handle, invoice.clone())?;
        tracing::debug!(
            turn,
            chars = self.raw.len(),
            has_invoice = invoice.is_some(),
            "Reply completed"
        );
        Ok(CompletedReply {
            turn,
            text: self.raw,
            invoice,
            invoice_error,
            persist_error: None,
        })
    }

    /// Mark the turn failed after a stream error
    pub fn fail(self, history: &mut MessageHistory, error: ApiError) -> Result<ReplyOutcome> {
        let turn = history.fail_streaming_turn(self.handle)?;
        tracing::error!(turn, "Reply stream failed: {}", error);
        Ok(ReplyOutcome::Failed { error, turn })
    }
}

/// One step of a [`ReplyStream`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Ended,
    Failed(ApiError),
    /// The conversation was switched away from
    Cancelled,
}

/// A cancellable generation stream bound to the turn it feeds
pub struct ReplyStream {
    stream: ChunkStream,
    token: CancellationToken,
    origin: StreamOrigin,
    accumulator: StreamAccumulator,
}

impl ReplyStream {
    pub fn new(
        stream: ChunkStream,
        token: CancellationToken,
        origin: StreamOrigin,
        accumulator: StreamAccumulator,
    ) -> Self {
        Self {
            stream,
            token,
            origin,
            accumulator,
        }
    }

    pub fn origin(&self) -> StreamOrigin {
        self.origin
    }

    pub fn handle(&self) -> StreamHandle {
        self.accumulator.handle()
    }

    /// Whether the conversation this stream belongs to was switched away from
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the next chunk; cancellation wins over a ready chunk
    pub async fn next_event(&mut self) -> StreamEvent {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => StreamEvent::Cancelled,
            item = self.stream.next() => match item {
                Some(Ok(chunk)) => StreamEvent::Chunk(chunk),
                Some(Err(error)) => StreamEvent::Failed(error),
                None => StreamEvent::Ended,
            },
        }
    }

    pub(crate) fn accumulator_mut(&mut self) -> &mut StreamAccumulator {
        &mut self.accumulator
    }

    pub(crate) fn into_accumulator(self) -> StreamAccumulator {
        self.accumulator
    }
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("origin", &self.origin)
            .field("accumulator", &self.accumulator)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
