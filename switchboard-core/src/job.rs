//! Document processing-job lifecycle types
//!
//! Jobs are owned by the external job store. This crate only models their
//! shape and the pure stage-transition rules; the context crate applies
//! those rules against the store.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of stage-history entries kept per job. Appending beyond
/// the cap drops the oldest entry.
pub const STAGE_HISTORY_CAP: usize = 25;

// ============================================================================
// JOB STAGE
// ============================================================================

/// Position in the document-processing lifecycle.
///
/// Stages only move forward (`registered` → ... → `injected`), with `failed`
/// reachable from anywhere. Rewinds are collapsed, not errors, so repeated
/// writes from concurrent requests stay idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Registered,
    Uploaded,
    Processing,
    Extracted,
    Indexed,
    Injected,
    Failed,
}

impl JobStage {
    /// Convert to wire string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStage::Registered => "registered",
            JobStage::Uploaded => "uploaded",
            JobStage::Processing => "processing",
            JobStage::Extracted => "extracted",
            JobStage::Indexed => "indexed",
            JobStage::Injected => "injected",
            JobStage::Failed => "failed",
        }
    }

    /// Parse from wire string representation.
    pub fn from_db_str(s: &str) -> Result<Self, JobStageParseError> {
        match s {
            "registered" => Ok(JobStage::Registered),
            "uploaded" => Ok(JobStage::Uploaded),
            "processing" => Ok(JobStage::Processing),
            "extracted" => Ok(JobStage::Extracted),
            "indexed" => Ok(JobStage::Indexed),
            "injected" => Ok(JobStage::Injected),
            "failed" => Ok(JobStage::Failed),
            _ => Err(JobStageParseError(s.to_string())),
        }
    }

    /// Ordinal used for the monotonic-advance rule. `Failed` sits outside
    /// the ordering and is handled explicitly.
    pub fn rank(&self) -> u8 {
        match self {
            JobStage::Registered => 0,
            JobStage::Uploaded => 1,
            JobStage::Processing => 2,
            JobStage::Extracted => 3,
            JobStage::Indexed => 4,
            JobStage::Injected => 5,
            JobStage::Failed => 6,
        }
    }

    /// Whether document content for this job can be used as context.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            JobStage::Extracted | JobStage::Indexed | JobStage::Injected
        )
    }

    /// Whether the job is still being prepared (triggers the
    /// still-processing short-circuit when every referenced job is pending).
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            JobStage::Registered | JobStage::Uploaded | JobStage::Processing
        )
    }
}

/// Error when parsing a job stage from a string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid job stage: {0}")]
pub struct JobStageParseError(pub String);

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for JobStage {
    type Err = JobStageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// PROCESSING JOB
// ============================================================================

/// One recorded stage change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: JobStage,
    pub timestamp: Timestamp,
}

/// A document processing job as read from the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    /// Store-assigned identifier.
    pub id: String,
    /// Current lifecycle stage.
    pub stage: JobStage,
    /// Ordered stage history, capped at [`STAGE_HISTORY_CAP`] entries.
    pub stage_history: Vec<StageTransition>,
    /// Opaque store metadata (file name, sizes, worker details).
    pub metadata: serde_json::Value,
}

impl ProcessingJob {
    /// Create a job at its initial stage with one history entry.
    pub fn new(id: impl Into<String>, stage: JobStage, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            stage,
            stage_history: vec![StageTransition {
                stage,
                timestamp: at,
            }],
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// File name recorded in store metadata, if present.
    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get("file_name").and_then(|v| v.as_str())
    }

    /// Apply a stage write under the lifecycle rules. Returns `true` when
    /// the job changed (stage moved or a history entry was appended).
    ///
    /// Rules:
    /// - stages never rewind; a lower-ranked write is ignored
    /// - writing the current stage again appends nothing
    /// - `Failed` is reachable from any stage
    /// - history is capped at [`STAGE_HISTORY_CAP`], dropping the oldest
    pub fn apply_stage(&mut self, stage: JobStage, at: Timestamp) -> bool {
        if stage == self.stage {
            return false;
        }
        if stage != JobStage::Failed && stage.rank() < self.stage.rank() {
            return false;
        }

        self.stage = stage;
        let duplicate_tail = self
            .stage_history
            .last()
            .map(|t| t.stage == stage)
            .unwrap_or(false);
        if !duplicate_tail {
            self.stage_history.push(StageTransition {
                stage,
                timestamp: at,
            });
            if self.stage_history.len() > STAGE_HISTORY_CAP {
                let excess = self.stage_history.len() - STAGE_HISTORY_CAP;
                self.stage_history.drain(0..excess);
            }
        }
        true
    }
}

// ============================================================================
// DOCUMENT REFERENCE
// ============================================================================

/// A job reference as supplied on a request: what the caller knows about a
/// document before the engine consults the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Job id in the external store.
    pub id: String,
    /// Display name of the uploaded file.
    pub file_name: String,
    /// Stage as last seen by the caller. Advisory only; the store is
    /// authoritative.
    pub status: Option<JobStage>,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: JobStage) -> Self {
        self.status = Some(status);
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
