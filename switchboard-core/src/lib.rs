//! Switchboard Core - Shared Data Types
//!
//! Pure data structures used by every other crate in the workspace: the
//! conversation and intent model, the parsed-command shape, the document
//! processing-job lifecycle, execution events, the stream-record transport
//! vocabulary, error families, and the engine configuration.
//!
//! No I/O lives here. Anything that talks to a collaborator belongs in the
//! crate that owns that collaborator.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod intent;
pub mod job;
pub mod message;

pub use command::ParsedCommand;
pub use config::EngineConfig;
pub use context::{ContextChunk, DocumentContext, SearchMode, SearchModeParseError};
pub use error::{
    AgentError, CommandError, ConfigError, ContextError, ErrorClass, LlmError, SwitchboardError,
    SwitchboardResult, ValidationError,
};
pub use event::{ExecutionEvent, LogRecord, StreamRecord};
pub use intent::{
    Intent, IntentClassification, IntentContext, IntentParseError, SuggestedTool,
    SuggestedToolParseError,
};
pub use job::{DocumentRef, JobStage, JobStageParseError, ProcessingJob, StageTransition};
pub use message::{ConversationMessage, MessageRole, MessageRoleParseError};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Request identifier using UUIDv7 for timestamp-sortable IDs.
pub type RequestId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 request id (timestamp-sortable).
pub fn new_request_id() -> RequestId {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_monotonic_within_a_burst() {
        let a = new_request_id();
        let b = new_request_id();
        // UUIDv7 embeds a millisecond timestamp; two sequential ids never
        // compare greater-to-lesser.
        assert!(a <= b);
    }
}
