//! Execution events and the stream-record transport vocabulary
//!
//! Everything a strategy produces while answering a turn is one
//! [`ExecutionEvent`]. The normalizer folds those onto the caller transport
//! as [`StreamRecord`]s: appendable content, structured log records, and a
//! single terminal sentinel.
//!
//! Events are a closed tagged union with one canonical extractor per
//! variant. Code that needs "the text of this event" calls
//! [`ExecutionEvent::content_text`]; nothing probes nested fields by name.

use crate::error::ErrorClass;
use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// EXECUTION EVENT
// ============================================================================

/// One unit of work inside an execution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Partial answer text, appendable in arrival order.
    Content {
        timestamp: Timestamp,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        text: String,
    },
    /// A tool is about to run.
    ToolCall {
        timestamp: Timestamp,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        arguments: Value,
    },
    /// A tool finished.
    ToolResult {
        timestamp: Timestamp,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        result: Value,
    },
    /// Something failed inside the strategy.
    Error {
        timestamp: Timestamp,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        class: ErrorClass,
        message: String,
    },
    /// Diagnostic record (progress, handoffs, fallbacks).
    System {
        timestamp: Timestamp,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// The strategy's final aggregate answer.
    FinalOutput {
        timestamp: Timestamp,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        text: String,
    },
}

impl ExecutionEvent {
    pub fn content(agent: Option<String>, text: impl Into<String>) -> Self {
        ExecutionEvent::Content {
            timestamp: Utc::now(),
            agent,
            text: text.into(),
        }
    }

    pub fn tool_call(
        agent: Option<String>,
        tool: impl Into<String>,
        command: Option<String>,
        arguments: Value,
    ) -> Self {
        ExecutionEvent::ToolCall {
            timestamp: Utc::now(),
            agent,
            tool: tool.into(),
            command,
            arguments,
        }
    }

    pub fn tool_result(
        agent: Option<String>,
        tool: impl Into<String>,
        command: Option<String>,
        result: Value,
    ) -> Self {
        ExecutionEvent::ToolResult {
            timestamp: Utc::now(),
            agent,
            tool: tool.into(),
            command,
            result,
        }
    }

    pub fn error(class: ErrorClass, message: impl Into<String>) -> Self {
        ExecutionEvent::Error {
            timestamp: Utc::now(),
            agent: None,
            class,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>, metadata: Option<Value>) -> Self {
        ExecutionEvent::System {
            timestamp: Utc::now(),
            message: message.into(),
            metadata,
        }
    }

    pub fn final_output(agent: Option<String>, text: impl Into<String>) -> Self {
        ExecutionEvent::FinalOutput {
            timestamp: Utc::now(),
            agent,
            text: text.into(),
        }
    }

    /// Canonical text extractor: the answer text this event carries, if any.
    /// Content and FinalOutput are the only content-bearing variants.
    pub fn content_text(&self) -> Option<&str> {
        match self {
            ExecutionEvent::Content { text, .. } => Some(text),
            ExecutionEvent::FinalOutput { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Stable kind name for logs and metrics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ExecutionEvent::Content { .. } => "content",
            ExecutionEvent::ToolCall { .. } => "tool_call",
            ExecutionEvent::ToolResult { .. } => "tool_result",
            ExecutionEvent::Error { .. } => "error",
            ExecutionEvent::System { .. } => "system",
            ExecutionEvent::FinalOutput { .. } => "final_output",
        }
    }
}

// ============================================================================
// STREAM RECORDS
// ============================================================================

/// Structured diagnostic record on the caller transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LogRecord {
    /// Kind of the originating event.
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl LogRecord {
    /// Build the transport log record for a diagnostic event. Content-bearing
    /// events return `None`; their text belongs on the content channel.
    pub fn from_event(event: &ExecutionEvent) -> Option<LogRecord> {
        match event {
            ExecutionEvent::Content { .. } | ExecutionEvent::FinalOutput { .. } => None,
            ExecutionEvent::ToolCall {
                agent,
                tool,
                command,
                arguments,
                ..
            } => Some(LogRecord {
                event_type: event.kind_str().to_string(),
                agent: agent.clone(),
                tool: Some(tool.clone()),
                command: command.clone(),
                metadata: Some(arguments.clone()),
                ..LogRecord::default()
            }),
            ExecutionEvent::ToolResult {
                agent,
                tool,
                command,
                result,
                ..
            } => Some(LogRecord {
                event_type: event.kind_str().to_string(),
                agent: agent.clone(),
                tool: Some(tool.clone()),
                command: command.clone(),
                result: Some(result.clone()),
                ..LogRecord::default()
            }),
            ExecutionEvent::Error {
                agent,
                class,
                message,
                ..
            } => Some(LogRecord {
                event_type: event.kind_str().to_string(),
                agent: agent.clone(),
                error: Some(message.clone()),
                metadata: Some(serde_json::json!({ "class": class.as_db_str() })),
                ..LogRecord::default()
            }),
            ExecutionEvent::System {
                message, metadata, ..
            } => Some(LogRecord {
                event_type: event.kind_str().to_string(),
                error: None,
                metadata: Some(serde_json::json!({
                    "message": message,
                    "detail": metadata,
                })),
                ..LogRecord::default()
            }),
        }
    }
}

/// One record on the caller-facing transport.
///
/// Invariant: every response stream carries exactly one `Done`, always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    /// Appendable answer text.
    Content { content: String },
    /// Structured diagnostic record.
    Log(LogRecord),
    /// Terminal sentinel.
    Done,
}

impl StreamRecord {
    pub fn content(text: impl Into<String>) -> Self {
        StreamRecord::Content {
            content: text.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamRecord::Done)
    }
}

// =============================================================================
// TESTS
// =============================================================================
