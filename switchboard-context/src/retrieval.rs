//! Chunk retrieval against the document search collaborator.
//!
//! The injector asks for chunks in one of two modes: vector similarity when
//! the request carries a `query`, whole-document order when it does not. The
//! collaborator echoes the mode it actually used in the response, which may
//! differ when no embedding backend sits behind it.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use switchboard_core::{ContextChunk, ContextError, DocumentContext, JobStage, SearchMode};

use crate::truncate;

// ============================================================================
// Request and result
// ============================================================================

/// One retrieval call. A present `query` requests vector mode; an absent
/// one requests whole-document (legacy) chunking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub job_ids: Vec<String>,
    /// Maximum chunks per document.
    pub limit: usize,
    /// Minimum similarity for vector-mode chunks.
    pub similarity_threshold: f32,
}

impl RetrievalRequest {
    /// Mode implied by the request shape.
    pub fn requested_mode(&self) -> SearchMode {
        if self.query.is_some() {
            SearchMode::Vector
        } else {
            SearchMode::Legacy
        }
    }
}

/// Chunks grouped per document, plus the mode the collaborator used.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub contexts: Vec<DocumentContext>,
    pub search_mode: SearchMode,
}

#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Whether an embedding backend is configured for vector search.
    fn vector_capable(&self) -> bool;

    async fn search(&self, request: &RetrievalRequest) -> Result<RetrievalResult, ContextError>;
}

// ============================================================================
// HTTP retrieval service
// ============================================================================

/// Retrieval backed by the HTTP search collaborator.
pub struct HttpRetrievalService {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    vector_capable: bool,
}

impl HttpRetrievalService {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ContextError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ContextError::RetrievalFailed {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            vector_capable: false,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Enable vector-mode requests. Leave off unless the collaborator has
    /// an embedding backend configured.
    pub fn with_vector_search(mut self, enabled: bool) -> Self {
        self.vector_capable = enabled;
        self
    }
}

impl fmt::Debug for HttpRetrievalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRetrievalService")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("vector_capable", &self.vector_capable)
            .finish()
    }
}

/// Wire shape of the collaborator response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSearchResponse {
    #[serde(default)]
    contexts: Vec<WireDocumentContext>,
    search_mode: SearchMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDocumentContext {
    job_id: String,
    file_name: String,
    #[serde(default)]
    chunks: Vec<WireChunk>,
    stage: Option<JobStage>,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    id: String,
    content: String,
    similarity: Option<f32>,
}

impl WireSearchResponse {
    fn into_result(self) -> RetrievalResult {
        let search_mode = self.search_mode;
        let contexts = self
            .contexts
            .into_iter()
            .map(|context| {
                if context.stage.is_some_and(|stage| stage.is_pending()) {
                    tracing::debug!(
                        job_id = %context.job_id,
                        stage = ?context.stage,
                        "collaborator returned chunks for a job it reports as pending"
                    );
                }
                DocumentContext {
                    job_id: context.job_id,
                    file_name: context.file_name,
                    chunks: context
                        .chunks
                        .into_iter()
                        .map(|chunk| ContextChunk {
                            id: chunk.id,
                            content: chunk.content,
                            similarity: chunk.similarity,
                        })
                        .collect(),
                    search_mode,
                    token: context.token,
                }
            })
            .collect();
        RetrievalResult {
            contexts,
            search_mode,
        }
    }
}

#[async_trait]
impl RetrievalService for HttpRetrievalService {
    fn vector_capable(&self) -> bool {
        self.vector_capable
    }

    async fn search(&self, request: &RetrievalRequest) -> Result<RetrievalResult, ContextError> {
        tracing::debug!(
            jobs = request.job_ids.len(),
            mode = %request.requested_mode(),
            "requesting document chunks"
        );

        let mut http_request = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(request);
        if let Some(token) = &self.auth_token {
            http_request = http_request.bearer_auth(token);
        }

        let response =
            http_request
                .send()
                .await
                .map_err(|e| ContextError::RetrievalFailed {
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContextError::RetrievalFailed {
                message: format!(
                    "collaborator returned status {}: {}",
                    status.as_u16(),
                    truncate(&body, 200)
                ),
            });
        }

        let wire: WireSearchResponse =
            response
                .json()
                .await
                .map_err(|e| ContextError::RetrievalFailed {
                    message: format!("unreadable search response: {e}"),
                })?;
        Ok(wire.into_result())
    }
}

// ============================================================================
// In-memory retrieval service
// ============================================================================

/// Process-local retrieval for tests and single-binary development runs.
/// Vector mode filters and ranks on seeded similarity scores; legacy mode
/// returns chunks in seed order.
#[derive(Debug, Default)]
pub struct InMemoryRetrievalService {
    documents: DashMap<String, SeededDocument>,
    vector_capable: bool,
}

#[derive(Debug, Clone)]
struct SeededDocument {
    file_name: String,
    chunks: Vec<ContextChunk>,
}

impl InMemoryRetrievalService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector_search(mut self, enabled: bool) -> Self {
        self.vector_capable = enabled;
        self
    }

    /// Seed the chunks for one document.
    pub fn seed_document(
        &self,
        job_id: impl Into<String>,
        file_name: impl Into<String>,
        chunks: Vec<ContextChunk>,
    ) {
        self.documents.insert(
            job_id.into(),
            SeededDocument {
                file_name: file_name.into(),
                chunks,
            },
        );
    }
}

#[async_trait]
impl RetrievalService for InMemoryRetrievalService {
    fn vector_capable(&self) -> bool {
        self.vector_capable
    }

    async fn search(&self, request: &RetrievalRequest) -> Result<RetrievalResult, ContextError> {
        let search_mode = if request.query.is_some() && self.vector_capable {
            SearchMode::Vector
        } else {
            SearchMode::Legacy
        };

        let mut contexts = Vec::new();
        for job_id in &request.job_ids {
            let Some(document) = self.documents.get(job_id) else {
                continue;
            };
            let mut chunks: Vec<ContextChunk> = document
                .chunks
                .iter()
                .filter(|chunk| match search_mode {
                    SearchMode::Vector => chunk
                        .similarity
                        .map_or(true, |score| score >= request.similarity_threshold),
                    SearchMode::Legacy => true,
                })
                .cloned()
                .collect();
            if search_mode == SearchMode::Vector {
                chunks.sort_by(|a, b| {
                    b.similarity
                        .unwrap_or(0.0)
                        .total_cmp(&a.similarity.unwrap_or(0.0))
                });
            }
            chunks.truncate(request.limit);
            if chunks.is_empty() {
                continue;
            }
            contexts.push(DocumentContext {
                job_id: job_id.clone(),
                file_name: document.file_name.clone(),
                chunks,
                search_mode,
                token: format!("mem-{job_id}"),
            });
        }

        Ok(RetrievalResult {
            contexts,
            search_mode,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_service() -> InMemoryRetrievalService {
        let service = InMemoryRetrievalService::new();
        service.seed_document(
            "job-1",
            "report.pdf",
            vec![
                ContextChunk::new("c-low", "Q1 summary.").with_similarity(0.2),
                ContextChunk::new("c-high", "Revenue grew 12% in Q2.").with_similarity(0.9),
                ContextChunk::new("c-mid", "Costs were flat.").with_similarity(0.5),
            ],
        );
        service.seed_document(
            "job-2",
            "notes.txt",
            vec![ContextChunk::new("n-1", "Meeting notes from March.")],
        );
        service
    }

    fn request(query: Option<&str>, job_ids: &[&str]) -> RetrievalRequest {
        RetrievalRequest {
            query: query.map(str::to_string),
            job_ids: job_ids.iter().map(|id| id.to_string()).collect(),
            limit: 6,
            similarity_threshold: 0.35,
        }
    }

    #[test]
    fn request_wire_shape_omits_absent_query() {
        let wire = serde_json::to_value(request(None, &["job-1"])).unwrap();
        assert!(wire.get("query").is_none());
        assert_eq!(wire["jobIds"][0], "job-1");
        assert!((wire["similarityThreshold"].as_f64().unwrap() - 0.35).abs() < 1e-6);
        assert_eq!(wire["limit"], 6);
    }

    #[test]
    fn request_mode_follows_query_presence() {
        assert_eq!(request(None, &[]).requested_mode(), SearchMode::Legacy);
        assert_eq!(
            request(Some("what changed?"), &[]).requested_mode(),
            SearchMode::Vector
        );
    }

    #[test]
    fn response_wire_shape_parses() {
        let wire: WireSearchResponse = serde_json::from_str(
            r#"{
                "contexts": [{
                    "jobId": "job-1",
                    "fileName": "report.pdf",
                    "chunks": [{"id": "c1", "content": "Revenue grew 12%.", "similarity": 0.5}],
                    "stage": "indexed",
                    "token": "tok-1"
                }],
                "searchMode": "vector"
            }"#,
        )
        .unwrap();

        let result = wire.into_result();
        assert_eq!(result.search_mode, SearchMode::Vector);
        assert_eq!(result.contexts.len(), 1);
        assert_eq!(result.contexts[0].file_name, "report.pdf");
        assert_eq!(result.contexts[0].chunks[0].similarity, Some(0.5));
        assert_eq!(result.contexts[0].search_mode, SearchMode::Vector);
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let wire: WireSearchResponse = serde_json::from_str(
            r#"{
                "contexts": [{"jobId": "job-1", "fileName": "report.pdf"}],
                "searchMode": "legacy"
            }"#,
        )
        .unwrap();
        let result = wire.into_result();
        assert!(result.contexts[0].chunks.is_empty());
        assert_eq!(result.contexts[0].token, "");
    }

    #[tokio::test]
    async fn vector_search_filters_and_ranks_by_similarity() {
        let service = seeded_service().with_vector_search(true);
        let result = service
            .search(&request(Some("revenue"), &["job-1"]))
            .await
            .unwrap();

        assert_eq!(result.search_mode, SearchMode::Vector);
        let chunks = &result.contexts[0].chunks;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "c-high");
        assert_eq!(chunks[1].id, "c-mid");
    }

    #[tokio::test]
    async fn legacy_search_returns_seed_order_and_ignores_threshold() {
        let service = seeded_service();
        let result = service.search(&request(None, &["job-1"])).await.unwrap();

        assert_eq!(result.search_mode, SearchMode::Legacy);
        let ids: Vec<&str> = result.contexts[0]
            .chunks
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c-low", "c-high", "c-mid"]);
    }

    #[tokio::test]
    async fn vector_request_without_backend_falls_back_to_legacy() {
        let service = seeded_service();
        let result = service
            .search(&request(Some("what changed?"), &["job-1"]))
            .await
            .unwrap();
        assert_eq!(result.search_mode, SearchMode::Legacy);
        assert_eq!(result.contexts[0].chunks.len(), 3);
    }

    #[tokio::test]
    async fn unknown_jobs_are_skipped() {
        let service = seeded_service();
        let result = service
            .search(&request(None, &["job-404", "job-2"]))
            .await
            .unwrap();
        assert_eq!(result.contexts.len(), 1);
        assert_eq!(result.contexts[0].job_id, "job-2");
    }

    #[tokio::test]
    async fn limit_caps_chunks_per_document() {
        let service = seeded_service();
        let mut req = request(None, &["job-1"]);
        req.limit = 1;
        let result = service.search(&req).await.unwrap();
        assert_eq!(result.contexts[0].chunks.len(), 1);
        assert_eq!(result.contexts[0].chunks[0].id, "c-low");
    }

    #[test]
    fn http_service_debug_redacts_auth_token() {
        let service = HttpRetrievalService::new("http://localhost:9", Duration::from_secs(1))
            .unwrap()
            .with_auth_token("sekrit-token");
        let rendered = format!("{service:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sekrit-token"));
    }
}
