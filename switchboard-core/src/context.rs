//! Document context types
//!
//! Transient per-request values produced by the retrieval collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// SEARCH MODE
// ============================================================================

/// How chunks were selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Ranked by embedding similarity against the query.
    Vector,
    /// Whole-document chunking in storage order.
    Legacy,
}

impl SearchMode {
    /// Convert to wire string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Legacy => "legacy",
        }
    }

    /// Parse from wire string representation.
    pub fn from_db_str(s: &str) -> Result<Self, SearchModeParseError> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "legacy" => Ok(SearchMode::Legacy),
            _ => Err(SearchModeParseError(s.to_string())),
        }
    }
}

/// Error when parsing a search mode from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid search mode: {0}")]
pub struct SearchModeParseError(pub String);

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for SearchMode {
    type Err = SearchModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// CONTEXT CHUNKS
// ============================================================================

/// One retrieved chunk of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Chunk identifier within the retrieval backend.
    pub id: String,
    /// Chunk text.
    pub content: String,
    /// Similarity score against the query. Present in vector mode only.
    pub similarity: Option<f32>,
}

impl ContextChunk {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            similarity: None,
        }
    }

    pub fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity = Some(similarity);
        self
    }
}

/// Retrieved context for one document within one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContext {
    /// Job the document belongs to.
    pub job_id: String,
    /// Display name of the file.
    pub file_name: String,
    /// Ranked chunks, best first.
    pub chunks: Vec<ContextChunk>,
    /// Selection mode the retrieval collaborator used.
    pub search_mode: SearchMode,
    /// Opaque continuation token from the retrieval collaborator.
    pub token: String,
}

// =============================================================================
// TESTS
// =============================================================================
