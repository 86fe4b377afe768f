//! Processing-job store access and stage tracking.
//!
//! The store is the source of truth for job lifecycle state. Every write in
//! this crate funnels through [`JobStageTracker`], which applies the pure
//! transition rules from `switchboard_core` and only touches the store when
//! a write actually changes the job.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    ContextError, DocumentRef, JobStage, ProcessingJob, SwitchboardError, SwitchboardResult,
};
use tokio::time::timeout;
use tracing::warn;

use crate::truncate;

// ============================================================================
// Job store
// ============================================================================

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>, ContextError>;

    async fn upsert(&self, job: &ProcessingJob) -> Result<(), ContextError>;
}

/// Store backed by the HTTP job collaborator.
pub struct HttpJobStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpJobStore {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ContextError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ContextError::JobStoreFailed {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }
}

impl fmt::Debug for HttpJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpJobStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>, ContextError> {
        let mut request = self.client.get(self.job_url(job_id));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ContextError::JobStoreFailed {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContextError::JobStoreFailed {
                message: format!(
                    "store returned status {}: {}",
                    status.as_u16(),
                    truncate(&body, 200)
                ),
            });
        }

        let job = response
            .json()
            .await
            .map_err(|e| ContextError::JobStoreFailed {
                message: format!("unreadable job payload: {e}"),
            })?;
        Ok(Some(job))
    }

    async fn upsert(&self, job: &ProcessingJob) -> Result<(), ContextError> {
        let mut request = self.client.put(self.job_url(&job.id)).json(job);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ContextError::JobStoreFailed {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContextError::JobStoreFailed {
                message: format!(
                    "store returned status {}: {}",
                    status.as_u16(),
                    truncate(&body, 200)
                ),
            });
        }
        Ok(())
    }
}

/// Process-local store for tests and single-binary development runs.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<String, ProcessingJob>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job directly, bypassing the transition rules.
    pub fn seed(&self, job: ProcessingJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    /// Current copy of a job, if present.
    pub fn job(&self, job_id: &str) -> Option<ProcessingJob> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>, ContextError> {
        Ok(self.jobs.get(job_id).map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, job: &ProcessingJob) -> Result<(), ContextError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }
}

// ============================================================================
// Stage tracker
// ============================================================================

/// Applies lifecycle writes against the store under a per-call time budget.
#[derive(Clone)]
pub struct JobStageTracker {
    store: Arc<dyn JobStore>,
    call_timeout: Duration,
}

impl fmt::Debug for JobStageTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStageTracker")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl JobStageTracker {
    pub fn new(store: Arc<dyn JobStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    async fn get_with_budget(&self, job_id: &str) -> SwitchboardResult<Option<ProcessingJob>> {
        match timeout(self.call_timeout, self.store.get(job_id)).await {
            Ok(result) => result.map_err(SwitchboardError::from),
            Err(_) => Err(SwitchboardError::timeout("job_store", self.call_timeout)),
        }
    }

    async fn put_with_budget(&self, job: &ProcessingJob) -> SwitchboardResult<()> {
        match timeout(self.call_timeout, self.store.upsert(job)).await {
            Ok(result) => result.map_err(SwitchboardError::from),
            Err(_) => Err(SwitchboardError::timeout("job_store", self.call_timeout)),
        }
    }

    /// Ensure a job exists, creating it at `registered` with the file name
    /// recorded in metadata. Returns the stored job.
    pub async fn register(
        &self,
        job_id: &str,
        file_name: &str,
    ) -> SwitchboardResult<ProcessingJob> {
        if let Some(existing) = self.get_with_budget(job_id).await? {
            return Ok(existing);
        }
        let job = ProcessingJob::new(job_id, JobStage::Registered, Utc::now())
            .with_metadata(json!({ "file_name": file_name }));
        self.put_with_budget(&job).await?;
        Ok(job)
    }

    /// Apply one stage write. Returns `true` when the job changed; writes
    /// nothing to the store otherwise. Unknown job ids are created at the
    /// written stage so late webhook deliveries are never dropped.
    pub async fn record_stage(&self, job_id: &str, stage: JobStage) -> SwitchboardResult<bool> {
        let (job, changed) = match self.get_with_budget(job_id).await? {
            Some(mut job) => {
                let changed = job.apply_stage(stage, Utc::now());
                (job, changed)
            }
            None => (ProcessingJob::new(job_id, stage, Utc::now()), true),
        };
        if changed {
            self.put_with_budget(&job).await?;
        }
        Ok(changed)
    }

    /// Read one job per reference, preserving request order. References the
    /// store has never seen come back as freshly-registered pending jobs.
    pub async fn snapshot(
        &self,
        documents: &[DocumentRef],
    ) -> SwitchboardResult<Vec<ProcessingJob>> {
        let lookups = documents.iter().map(|doc| self.get_with_budget(&doc.id));
        let results = future::join_all(lookups).await;

        let mut jobs = Vec::with_capacity(documents.len());
        for (doc, result) in documents.iter().zip(results) {
            match result? {
                Some(job) => jobs.push(job),
                None => jobs.push(
                    ProcessingJob::new(doc.id.clone(), JobStage::Registered, Utc::now())
                        .with_metadata(json!({ "file_name": doc.file_name })),
                ),
            }
        }
        Ok(jobs)
    }

    /// Advance every id to `injected`, concurrently. Individual failures are
    /// logged and skipped; returns the count of jobs that actually moved.
    pub async fn mark_injected(&self, job_ids: &[String]) -> usize {
        let writes = job_ids.iter().map(|job_id| async move {
            match self.record_stage(job_id, JobStage::Injected).await {
                Ok(changed) => changed,
                Err(error) => {
                    warn!(job_id = %job_id, error = %error, "failed to advance job to injected");
                    false
                }
            }
        });
        future::join_all(writes)
            .await
            .into_iter()
            .filter(|changed| *changed)
            .count()
    }
}

// ============================================================================
// Tests
// ============================================================================
