//! Error types for Switchboard operations
//!
//! One thiserror family per concern, folded into the master
//! [`SwitchboardError`]. Every collaborator failure is converted into a
//! family variant at its call site; the transport layer then maps the
//! master error onto the response taxonomy via [`SwitchboardError::classify`]
//! and renders the user-visible text via [`SwitchboardError::user_message`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR FAMILIES
// ============================================================================

/// Request-shape validation errors. Raised before any side effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field} exceeds maximum length of {limit}")]
    TooLong { field: String, limit: usize },
}

/// Slash-command parsing and execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Not a slash command: input must start with '/'")]
    NotSlashCommand,

    #[error("Malformed command at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("Unknown command server: {server_id}")]
    UnknownServer { server_id: String },

    #[error("Command /{server_id} {command} failed: {message}")]
    ExecutionFailed {
        server_id: String,
        command: String,
        message: String,
    },

    #[error("Command server {server_id} requires authentication")]
    AuthenticationRequired { server_id: String },

    #[error("Gateway transport error: {message}")]
    Transport { message: String },
}

/// Model provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No credentials configured for provider {provider}")]
    MissingCredentials { provider: String },

    #[error("Provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} did not open a stream within {budget_ms}ms")]
    ConnectTimeout { provider: String, budget_ms: u64 },

    #[error("Stream from {provider} closed unexpectedly: {reason}")]
    StreamClosed { provider: String, reason: String },
}

/// Retrieval and job-store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Retrieval request failed: {message}")]
    RetrievalFailed { message: String },

    #[error("Job store request failed: {message}")]
    JobStoreFailed { message: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },
}

/// Agent graph and runner errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Graph construction failed: {reason}")]
    GraphConstruction { reason: String },

    #[error("Unknown agent node: {name}")]
    UnknownNode { name: String },

    #[error("Runner backend cannot execute tool kind: {tool}")]
    UnsupportedCapability { tool: String },

    #[error("Turn budget of {limit} exhausted")]
    TurnBudgetExhausted { limit: u32 },

    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// ============================================================================
// MASTER ERROR
// ============================================================================

/// Master error type for all Switchboard operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SwitchboardError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation timed out: {operation} exceeded {budget_ms}ms")]
    Timeout { operation: String, budget_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Switchboard operations.
pub type SwitchboardResult<T> = Result<T, SwitchboardError>;

// ============================================================================
// RESPONSE TAXONOMY
// ============================================================================

/// How an error surfaces on the caller transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed request shape; rejected before side effects.
    Validation,
    /// A collaborator exceeded its time budget.
    UpstreamTimeout,
    /// The agent runner cannot run here; silent fallback, never user-facing.
    CapabilityIncompatibility,
    /// A model provider returned 4xx/5xx or an unusable payload.
    UpstreamProvider,
    /// One parsed command failed; the rest of the answer continues.
    CommandExecution,
    /// A command needs a credential the caller lacks.
    AuthenticationRequired,
    /// Anything unclassified, converted at the outermost boundary.
    Internal,
}

impl ErrorClass {
    /// Convert to wire string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::UpstreamTimeout => "upstream_timeout",
            ErrorClass::CapabilityIncompatibility => "capability_incompatibility",
            ErrorClass::UpstreamProvider => "upstream_provider",
            ErrorClass::CommandExecution => "command_execution",
            ErrorClass::AuthenticationRequired => "authentication_required",
            ErrorClass::Internal => "internal",
        }
    }
}

impl SwitchboardError {
    /// Build a timeout error from the operation name and its budget.
    pub fn timeout(operation: impl Into<String>, budget: Duration) -> Self {
        SwitchboardError::Timeout {
            operation: operation.into(),
            budget_ms: budget.as_millis() as u64,
        }
    }

    /// Map this error onto the response taxonomy.
    pub fn classify(&self) -> ErrorClass {
        match self {
            SwitchboardError::Validation(_) => ErrorClass::Validation,
            SwitchboardError::Command(CommandError::NotSlashCommand)
            | SwitchboardError::Command(CommandError::Malformed { .. }) => ErrorClass::Validation,
            SwitchboardError::Command(CommandError::AuthenticationRequired { .. }) => {
                ErrorClass::AuthenticationRequired
            }
            SwitchboardError::Command(_) => ErrorClass::CommandExecution,
            SwitchboardError::Llm(LlmError::ConnectTimeout { .. }) => ErrorClass::UpstreamTimeout,
            SwitchboardError::Llm(_) => ErrorClass::UpstreamProvider,
            SwitchboardError::Agent(AgentError::UnsupportedCapability { .. })
            | SwitchboardError::Agent(AgentError::GraphConstruction { .. }) => {
                ErrorClass::CapabilityIncompatibility
            }
            SwitchboardError::Timeout { .. } => ErrorClass::UpstreamTimeout,
            SwitchboardError::Agent(_)
            | SwitchboardError::Context(_)
            | SwitchboardError::Config(_)
            | SwitchboardError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// User-visible text for this error. Stable strings; the transport is
    /// expected to emit them verbatim as content.
    pub fn user_message(&self) -> String {
        match self {
            SwitchboardError::Validation(e) => {
                format!("I couldn't process that request: {}.", e)
            }
            SwitchboardError::Command(CommandError::NotSlashCommand) => {
                "Commands must start with '/', like `/server command key=value`.".to_string()
            }
            SwitchboardError::Command(CommandError::Malformed { reason, .. }) => {
                format!("That command couldn't be parsed: {}.", reason)
            }
            SwitchboardError::Command(CommandError::AuthenticationRequired { server_id }) => {
                format!(
                    "The {} integration requires credentials you haven't connected yet. \
                     Link it in your integration settings and try again.",
                    server_id
                )
            }
            SwitchboardError::Command(CommandError::UnknownServer { server_id }) => {
                format!("I don't know a command server called {}.", server_id)
            }
            SwitchboardError::Command(e) => {
                format!("The command could not be completed: {}.", e)
            }
            SwitchboardError::Llm(LlmError::MissingCredentials { .. })
            | SwitchboardError::Llm(LlmError::ProviderNotConfigured { .. }) => {
                "I'm sorry - I can't reach a language model right now because no provider \
                 credentials are configured."
                    .to_string()
            }
            SwitchboardError::Llm(LlmError::ConnectTimeout { .. })
            | SwitchboardError::Timeout { .. } => {
                "I'm sorry - part of this request took too long and was stopped. Please try again."
                    .to_string()
            }
            SwitchboardError::Llm(_) => {
                "I'm sorry - the model provider returned an error. Please try again in a moment."
                    .to_string()
            }
            _ => "I'm sorry - something went wrong while assembling this response. Please try \
                  again."
                .to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_families_fold_into_master() {
        let validation = SwitchboardError::from(ValidationError::RequiredFieldMissing {
            field: "messages".to_string(),
        });
        assert!(matches!(validation, SwitchboardError::Validation(_)));

        let command = SwitchboardError::from(CommandError::NotSlashCommand);
        assert!(matches!(command, SwitchboardError::Command(_)));

        let llm = SwitchboardError::from(LlmError::ProviderNotConfigured {
            provider: "anthropic".to_string(),
        });
        assert!(matches!(llm, SwitchboardError::Llm(_)));

        let context = SwitchboardError::from(ContextError::JobNotFound {
            job_id: "job-1".to_string(),
        });
        assert!(matches!(context, SwitchboardError::Context(_)));

        let agent = SwitchboardError::from(AgentError::TurnBudgetExhausted { limit: 20 });
        assert!(matches!(agent, SwitchboardError::Agent(_)));

        let config = SwitchboardError::from(ConfigError::MissingRequired {
            field: "bind".to_string(),
        });
        assert!(matches!(config, SwitchboardError::Config(_)));
    }

    #[test]
    fn test_classify_maps_the_taxonomy() {
        let cases = [
            (
                SwitchboardError::from(ValidationError::RequiredFieldMissing {
                    field: "query".to_string(),
                }),
                ErrorClass::Validation,
            ),
            (
                SwitchboardError::timeout("retrieval", Duration::from_secs(30)),
                ErrorClass::UpstreamTimeout,
            ),
            (
                SwitchboardError::from(AgentError::UnsupportedCapability {
                    tool: "browser".to_string(),
                }),
                ErrorClass::CapabilityIncompatibility,
            ),
            (
                SwitchboardError::from(LlmError::RequestFailed {
                    provider: "openai".to_string(),
                    status: 500,
                    message: "boom".to_string(),
                }),
                ErrorClass::UpstreamProvider,
            ),
            (
                SwitchboardError::from(LlmError::ConnectTimeout {
                    provider: "anthropic".to_string(),
                    budget_ms: 60_000,
                }),
                ErrorClass::UpstreamTimeout,
            ),
            (
                SwitchboardError::from(CommandError::ExecutionFailed {
                    server_id: "email-mcp".to_string(),
                    command: "send_test_email".to_string(),
                    message: "smtp down".to_string(),
                }),
                ErrorClass::CommandExecution,
            ),
            (
                SwitchboardError::from(CommandError::AuthenticationRequired {
                    server_id: "email-mcp".to_string(),
                }),
                ErrorClass::AuthenticationRequired,
            ),
            (
                SwitchboardError::Internal("unexpected".to_string()),
                ErrorClass::Internal,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.classify(), expected, "error: {error}");
        }
    }

    #[test]
    fn test_timeout_constructor_records_budget_ms() {
        let err = SwitchboardError::timeout("command", Duration::from_secs(30));
        match err {
            SwitchboardError::Timeout {
                operation,
                budget_ms,
            } => {
                assert_eq!(operation, "command");
                assert_eq!(budget_ms, 30_000);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_credentials_message_is_apologetic_not_fatal() {
        let err = SwitchboardError::from(LlmError::MissingCredentials {
            provider: "anthropic".to_string(),
        });
        let message = err.user_message();
        assert!(message.contains("I'm sorry"));
        assert!(message.contains("credentials"));
    }

    #[test]
    fn test_auth_required_message_names_the_server() {
        let err = SwitchboardError::from(CommandError::AuthenticationRequired {
            server_id: "email-mcp".to_string(),
        });
        assert!(err.user_message().contains("email-mcp"));
    }

    #[test]
    fn test_error_class_db_str_is_snake_case() {
        assert_eq!(
            ErrorClass::CapabilityIncompatibility.as_db_str(),
            "capability_incompatibility"
        );
        assert_eq!(ErrorClass::UpstreamTimeout.as_db_str(), "upstream_timeout");
    }
}
