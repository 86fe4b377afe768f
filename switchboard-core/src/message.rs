//! Conversation message types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// MESSAGE ROLE
// ============================================================================

/// Role of a message within the caller-supplied conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Convert to wire string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Parse from wire string representation.
    pub fn from_db_str(s: &str) -> Result<Self, MessageRoleParseError> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(MessageRoleParseError(s.to_string())),
        }
    }
}

/// Error when parsing a message role from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid message role: {0}")]
pub struct MessageRoleParseError(pub String);

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MessageRole {
    type Err = MessageRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// CONVERSATION MESSAGE
// ============================================================================

/// One message of the caller-supplied conversation.
///
/// Immutable within a request: the engine reads the conversation to build
/// provider calls but never rewrites what the caller sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Who produced this message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl ConversationMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// The most recent user message of a conversation, if any.
pub fn latest_user_message(messages: &[ConversationMessage]) -> Option<&ConversationMessage> {
    messages.iter().rev().find(|m| m.role == MessageRole::User)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            let parsed = MessageRole::from_db_str(role.as_db_str());
            assert_eq!(parsed, Ok(role));
        }
    }

    #[test]
    fn test_role_rejects_unknown_string() {
        let err = MessageRole::from_db_str("system");
        assert_eq!(err, Err(MessageRoleParseError("system".to_string())));
    }

    #[test]
    fn test_role_serde_uses_lowercase() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_latest_user_message_skips_trailing_assistant() {
        let messages = vec![
            ConversationMessage::user("first"),
            ConversationMessage::assistant("reply"),
            ConversationMessage::user("second"),
            ConversationMessage::assistant("another reply"),
        ];
        let latest = latest_user_message(&messages);
        assert_eq!(latest.map(|m| m.content.as_str()), Some("second"));
    }

    #[test]
    fn test_latest_user_message_empty_conversation() {
        assert!(latest_user_message(&[]).is_none());
    }
}
