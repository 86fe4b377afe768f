//! Intent classification types
//!
//! Produced once per request by the query classifier and discarded after
//! routing. The classification is a hint: it seeds the routing decision
//! table and the provider prompt, it never executes anything itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// INTENT
// ============================================================================

/// The capability a query is routed toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Answer from uploaded document context.
    Document,
    /// Answer from general knowledge / web-style synthesis.
    Web,
    /// Explain or execute a named external integration.
    Command,
    /// Recall or store conversational memory.
    Memory,
    /// Try document context first, fall back to web-style synthesis.
    Hybrid,
    /// Nothing usable in the query (empty or whitespace).
    Unknown,
}

impl Intent {
    /// Convert to wire string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Intent::Document => "document",
            Intent::Web => "web",
            Intent::Command => "command",
            Intent::Memory => "memory",
            Intent::Hybrid => "hybrid",
            Intent::Unknown => "unknown",
        }
    }

    /// Parse from wire string representation.
    pub fn from_db_str(s: &str) -> Result<Self, IntentParseError> {
        match s {
            "document" => Ok(Intent::Document),
            "web" => Ok(Intent::Web),
            "command" => Ok(Intent::Command),
            "memory" => Ok(Intent::Memory),
            "hybrid" => Ok(Intent::Hybrid),
            "unknown" => Ok(Intent::Unknown),
            _ => Err(IntentParseError(s.to_string())),
        }
    }
}

/// Error when parsing an intent from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid intent: {0}")]
pub struct IntentParseError(pub String);

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Intent {
    type Err = IntentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// SUGGESTED TOOL
// ============================================================================

/// Tool hint attached to a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedTool {
    SearchDocuments,
    WebSearch,
    ExecuteCommand,
    StoreMemory,
    QueryMemory,
}

impl SuggestedTool {
    /// Convert to wire string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SuggestedTool::SearchDocuments => "search_documents",
            SuggestedTool::WebSearch => "web_search",
            SuggestedTool::ExecuteCommand => "execute_command",
            SuggestedTool::StoreMemory => "store_memory",
            SuggestedTool::QueryMemory => "query_memory",
        }
    }

    /// Parse from wire string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SuggestedToolParseError> {
        match s {
            "search_documents" => Ok(SuggestedTool::SearchDocuments),
            "web_search" => Ok(SuggestedTool::WebSearch),
            "execute_command" => Ok(SuggestedTool::ExecuteCommand),
            "store_memory" => Ok(SuggestedTool::StoreMemory),
            "query_memory" => Ok(SuggestedTool::QueryMemory),
            _ => Err(SuggestedToolParseError(s.to_string())),
        }
    }
}

/// Error when parsing a suggested tool from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid suggested tool: {0}")]
pub struct SuggestedToolParseError(pub String);

impl fmt::Display for SuggestedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SuggestedTool {
    type Err = SuggestedToolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Signals the classifier extracted alongside the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IntentContext {
    /// Known document name detected in the query, if any.
    pub document_name: Option<String>,
    /// Whether the query matched a question pattern or ends with `?`.
    pub is_question: bool,
    /// Keywords that contributed to the score.
    pub keywords: Vec<String>,
}

/// Result of classifying one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    /// Routed capability.
    pub intent: Intent,
    /// Score in [0, 1]. Clamped, never NaN.
    pub confidence: f32,
    /// Tool hint for the selected strategy.
    pub suggested_tool: Option<SuggestedTool>,
    /// Extracted signals.
    pub context: IntentContext,
}

impl IntentClassification {
    /// Classification for an empty or unusable query.
    pub fn unknown() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            suggested_tool: None,
            context: IntentContext::default(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
