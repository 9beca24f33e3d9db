//! Estimate conversation state
//!
//! Components, leaves first:
//!
//! - [`quota`]: anonymous daily call limit
//! - [`history`]: append-only transcript
//! - [`accumulator`]: streamed reply collection and invoice extraction
//! - [`store`]: current-session tracking and switch cancellation
//! - [`list_cache`]: session summaries for navigation
//!
//! [`context::ChatSessionContext`] ties them together.

pub mod accumulator;
pub mod context;
pub mod history;
pub mod list_cache;
pub mod quota;
pub mod store;

pub use accumulator::{CompletedReply, ReplyOutcome, ReplyStream, StreamEvent, StreamOrigin};
pub use context::{BeginReply, ChatSessionContext, ChunkDisposition, SendOutcome};
pub use history::{MessageHistory, Role, StreamHandle, Turn, TurnStatus};
pub use list_cache::SessionListCache;
pub use quota::{Clock, LocalClock, ManualClock, QuotaDecision, QuotaGate, QuotaState};
pub use store::{SessionEvent, SessionStore};
