//! Durable conversation-state collaborator.
//!
//! Terminal command results are written back into the conversation exactly
//! once so they can be rendered as chat artifacts and fed into follow-up
//! prompts. The store itself (database, session state) is outside the
//! bridge; the lifecycle only needs this narrow seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted tool-call outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallEntry {
    pub tool_name: String,
    /// The shell command text, when the invocation was a shell command.
    pub command: Option<String>,
    pub success: bool,
    pub result_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Where terminal command results land.
///
/// Implementations must tolerate being called from an async context but are
/// not themselves async; callers buffer or spawn as needed.
pub trait ConversationSink {
    fn append_tool_call(&mut self, entry: ToolCallEntry);
}

/// In-memory sink for tests and headless embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Vec<ToolCallEntry>,
}

impl MemorySink {
    pub fn entries(&self) -> &[ToolCallEntry] {
        &self.entries
    }
}

impl ConversationSink for MemorySink {
    fn append_tool_call(&mut self, entry: ToolCallEntry) {
        self.entries.push(entry);
    }
}
