//! Document context injection.
//!
//! One call per turn: read job state, short-circuit when nothing is ready,
//! otherwise fetch chunks for the ready subset and render the block that
//! gets prefixed to the system prompt. Used jobs advance to `injected`
//! afterwards so later turns can tell already-served documents apart.

use crate::jobs::{JobStageTracker, JobStore};
use crate::retrieval::{RetrievalRequest, RetrievalService};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    DocumentContext, DocumentRef, EngineConfig, ProcessingJob, SearchMode, SwitchboardError,
};
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Retrieval knobs for one injector instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectorConfig {
    /// Budget for one retrieval or job-store call.
    pub call_timeout: Duration,
    /// Maximum chunks per document.
    pub retrieval_limit: usize,
    /// Minimum similarity for vector-mode chunks.
    pub similarity_threshold: f32,
    /// Minimum query length before vector mode is considered.
    pub vector_query_min_chars: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retrieval_limit: 6,
            similarity_threshold: 0.35,
            vector_query_min_chars: 10,
        }
    }
}

impl From<&EngineConfig> for InjectorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            call_timeout: config.retrieval_timeout,
            retrieval_limit: config.retrieval_limit,
            similarity_threshold: config.similarity_threshold,
            vector_query_min_chars: config.vector_query_min_chars,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Rendered context ready for prompt assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedContext {
    /// Delimited block prefixed to the system prompt.
    pub block: String,
    /// Mode the retrieval collaborator used.
    pub mode: SearchMode,
    /// Total chunks across all documents.
    pub chunk_count: usize,
    /// Jobs whose content made it into the block.
    pub used_jobs: Vec<String>,
    /// Display names for the used jobs.
    pub file_names: Vec<String>,
}

/// What one injection attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectionOutcome {
    /// No document references on the request.
    NoDocuments,
    /// Every referenced job is still pending. The message is the complete
    /// response for this turn; no model call happens.
    StillProcessing { message: String },
    /// Context retrieved and rendered.
    Injected(InjectedContext),
    /// A collaborator failed or timed out; the caller decides how to degrade.
    Unavailable { error: SwitchboardError },
}

// ============================================================================
// Injector
// ============================================================================

pub struct ContextInjector {
    retrieval: Arc<dyn RetrievalService>,
    tracker: JobStageTracker,
    config: InjectorConfig,
}

impl fmt::Debug for ContextInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextInjector")
            .field("config", &self.config)
            .finish()
    }
}

impl ContextInjector {
    pub fn new(
        retrieval: Arc<dyn RetrievalService>,
        store: Arc<dyn JobStore>,
        config: InjectorConfig,
    ) -> Self {
        let tracker = JobStageTracker::new(store, config.call_timeout);
        Self {
            retrieval,
            tracker,
            config,
        }
    }

    /// Stage tracker sharing this injector's store and time budget.
    pub fn tracker(&self) -> &JobStageTracker {
        &self.tracker
    }

    /// Run the injection sequence for one turn.
    pub async fn inject(&self, query: &str, documents: &[DocumentRef]) -> InjectionOutcome {
        if documents.is_empty() {
            return InjectionOutcome::NoDocuments;
        }

        let jobs = match self.tracker.snapshot(documents).await {
            Ok(jobs) => jobs,
            Err(error) => {
                warn!(error = %error, "job snapshot failed; skipping document context");
                return InjectionOutcome::Unavailable { error };
            }
        };

        let ready: Vec<&ProcessingJob> = jobs.iter().filter(|job| job.stage.is_ready()).collect();
        if ready.is_empty() {
            let pending: Vec<String> = jobs
                .iter()
                .filter(|job| job.stage.is_pending())
                .map(|job| display_name(job, documents))
                .collect();
            if !pending.is_empty() {
                debug!(
                    pending = pending.len(),
                    "all referenced documents still processing"
                );
                return InjectionOutcome::StillProcessing {
                    message: still_processing_message(&pending),
                };
            }
            warn!("every referenced document job failed; answering without context");
            return InjectionOutcome::NoDocuments;
        }

        let request = RetrievalRequest {
            query: self
                .vector_eligible(query)
                .then(|| query.trim().to_string()),
            job_ids: ready.iter().map(|job| job.id.clone()).collect(),
            limit: self.config.retrieval_limit,
            similarity_threshold: self.config.similarity_threshold,
        };

        let result = match tokio::time::timeout(
            self.config.call_timeout,
            self.retrieval.search(&request),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                warn!(error = %error, "retrieval failed");
                return InjectionOutcome::Unavailable {
                    error: error.into(),
                };
            }
            Err(_) => {
                let error = SwitchboardError::timeout("retrieval", self.config.call_timeout);
                warn!(error = %error, "retrieval timed out");
                return InjectionOutcome::Unavailable { error };
            }
        };

        let contexts: Vec<DocumentContext> = result
            .contexts
            .into_iter()
            .filter(|context| !context.chunks.is_empty())
            .collect();
        if contexts.is_empty() {
            debug!("retrieval returned no usable chunks");
            return InjectionOutcome::NoDocuments;
        }

        let chunk_count = contexts.iter().map(|c| c.chunks.len()).sum();
        let used_jobs: Vec<String> = contexts.iter().map(|c| c.job_id.clone()).collect();
        let file_names: Vec<String> = contexts.iter().map(|c| c.file_name.clone()).collect();
        let block = render_block(&contexts);

        let advanced = self.tracker.mark_injected(&used_jobs).await;
        debug!(
            documents = used_jobs.len(),
            chunks = chunk_count,
            advanced,
            mode = %result.search_mode,
            "document context injected"
        );

        InjectionOutcome::Injected(InjectedContext {
            block,
            mode: result.search_mode,
            chunk_count,
            used_jobs,
            file_names,
        })
    }

    fn vector_eligible(&self, query: &str) -> bool {
        self.retrieval.vector_capable()
            && query.trim().chars().count() >= self.config.vector_query_min_chars
            && !is_bare_greeting(query)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Fixed response used when every referenced document is still pending.
pub fn still_processing_message(file_names: &[String]) -> String {
    if file_names.is_empty() {
        return "Your documents are still being processed. Try again in a moment.".to_string();
    }
    format!(
        "Your documents are still being processed: {}. Try again in a moment and I'll answer using their contents.",
        file_names.join(", ")
    )
}

/// True for queries that are just a greeting. Greetings make useless
/// embedding queries, so they force legacy retrieval regardless of length.
pub fn is_bare_greeting(query: &str) -> bool {
    const GREETINGS: [&str; 11] = [
        "hi",
        "hello",
        "hey",
        "yo",
        "sup",
        "hiya",
        "howdy",
        "hola",
        "good morning",
        "good afternoon",
        "good evening",
    ];
    let normalized = query
        .trim()
        .trim_end_matches(['!', '.', '?', ','])
        .trim_end()
        .to_lowercase();
    GREETINGS.contains(&normalized.as_str())
}

fn display_name(job: &ProcessingJob, documents: &[DocumentRef]) -> String {
    job.file_name()
        .map(str::to_string)
        .or_else(|| {
            documents
                .iter()
                .find(|doc| doc.id == job.id)
                .map(|doc| doc.file_name.clone())
        })
        .unwrap_or_else(|| job.id.clone())
}

fn render_block(contexts: &[DocumentContext]) -> String {
    let mut block = String::from("<document-context>\n");
    for context in contexts {
        block.push_str("### ");
        block.push_str(&context.file_name);
        block.push('\n');
        for chunk in &context.chunks {
            block.push_str(chunk.content.trim());
            block.push_str("\n\n");
        }
    }
    block.push_str("</document-context>\n");
    block.push_str("Use the document context above when it is relevant to the question.");
    block
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobStore;
    use crate::retrieval::RetrievalResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use switchboard_core::{ContextChunk, ContextError, JobStage, ProcessingJob};

    struct CannedRetrieval {
        vector: bool,
        contexts: Vec<DocumentContext>,
        requests: Mutex<Vec<RetrievalRequest>>,
    }

    impl CannedRetrieval {
        fn new(vector: bool, contexts: Vec<DocumentContext>) -> Self {
            Self {
                vector,
                contexts,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> RetrievalRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl RetrievalService for CannedRetrieval {
        fn vector_capable(&self) -> bool {
            self.vector
        }

        async fn search(
            &self,
            request: &RetrievalRequest,
        ) -> Result<RetrievalResult, ContextError> {
            self.requests.lock().unwrap().push(request.clone());
            let search_mode = if self.vector && request.query.is_some() {
                SearchMode::Vector
            } else {
                SearchMode::Legacy
            };
            Ok(RetrievalResult {
                contexts: self.contexts.clone(),
                search_mode,
            })
        }
    }

    struct HangingRetrieval;

    #[async_trait]
    impl RetrievalService for HangingRetrieval {
        fn vector_capable(&self) -> bool {
            false
        }

        async fn search(
            &self,
            _request: &RetrievalRequest,
        ) -> Result<RetrievalResult, ContextError> {
            std::future::pending().await
        }
    }

    fn doc_context(job_id: &str, file_name: &str, texts: &[&str]) -> DocumentContext {
        DocumentContext {
            job_id: job_id.to_string(),
            file_name: file_name.to_string(),
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, text)| ContextChunk::new(format!("{job_id}-c{i}"), *text))
                .collect(),
            search_mode: SearchMode::Legacy,
            token: format!("tok-{job_id}"),
        }
    }

    fn refs(pairs: &[(&str, &str)]) -> Vec<DocumentRef> {
        pairs
            .iter()
            .map(|(id, name)| DocumentRef::new(*id, *name))
            .collect()
    }

    fn injector_with(
        retrieval: Arc<CannedRetrieval>,
        store: Arc<InMemoryJobStore>,
    ) -> ContextInjector {
        ContextInjector::new(retrieval, store, InjectorConfig::default())
    }

    #[tokio::test]
    async fn no_documents_short_circuits() {
        let retrieval = Arc::new(CannedRetrieval::new(false, vec![]));
        let injector = injector_with(retrieval.clone(), Arc::new(InMemoryJobStore::new()));

        let outcome = injector.inject("what changed?", &[]).await;
        assert_eq!(outcome, InjectionOutcome::NoDocuments);
        assert_eq!(retrieval.request_count(), 0);
    }

    #[tokio::test]
    async fn still_processing_lists_names_and_skips_retrieval() {
        let retrieval = Arc::new(CannedRetrieval::new(false, vec![]));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-b", JobStage::Processing, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        let outcome = injector
            .inject(
                "summarize these files",
                &refs(&[("job-a", "report.pdf"), ("job-b", "data.csv")]),
            )
            .await;

        let expected = still_processing_message(&["report.pdf".to_string(), "data.csv".to_string()]);
        assert_eq!(
            outcome,
            InjectionOutcome::StillProcessing { message: expected }
        );
        assert_eq!(retrieval.request_count(), 0);
    }

    #[tokio::test]
    async fn mixed_set_uses_ready_subset_only() {
        let retrieval = Arc::new(CannedRetrieval::new(
            false,
            vec![doc_context("job-1", "report.pdf", &["Revenue grew 12%."])],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        store.seed(ProcessingJob::new("job-2", JobStage::Processing, Utc::now()));
        let injector = injector_with(retrieval.clone(), store.clone());

        let outcome = injector
            .inject(
                "what does the report say?",
                &refs(&[("job-1", "report.pdf"), ("job-2", "data.csv")]),
            )
            .await;

        let injected = match outcome {
            InjectionOutcome::Injected(injected) => injected,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(retrieval.last_request().job_ids, vec!["job-1".to_string()]);
        assert_eq!(injected.used_jobs, vec!["job-1".to_string()]);
        assert_eq!(store.job("job-1").unwrap().stage, JobStage::Injected);
        assert_eq!(store.job("job-2").unwrap().stage, JobStage::Processing);
    }

    #[tokio::test]
    async fn short_query_requests_legacy_mode() {
        let retrieval = Arc::new(CannedRetrieval::new(
            true,
            vec![doc_context("job-1", "report.pdf", &["body"])],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        injector
            .inject("summary", &refs(&[("job-1", "report.pdf")]))
            .await;
        assert!(retrieval.last_request().query.is_none());
    }

    #[tokio::test]
    async fn bare_greeting_requests_legacy_mode() {
        let retrieval = Arc::new(CannedRetrieval::new(
            true,
            vec![doc_context("job-1", "report.pdf", &["body"])],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        // Long enough for vector mode, but still just a greeting.
        injector
            .inject("good morning!", &refs(&[("job-1", "report.pdf")]))
            .await;
        assert!(retrieval.last_request().query.is_none());
    }

    #[tokio::test]
    async fn long_question_requests_vector_mode() {
        let retrieval = Arc::new(CannedRetrieval::new(
            true,
            vec![doc_context("job-1", "report.pdf", &["Revenue grew 12%."])],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        let outcome = injector
            .inject(
                "  what does the report say about revenue?  ",
                &refs(&[("job-1", "report.pdf")]),
            )
            .await;

        assert_eq!(
            retrieval.last_request().query.as_deref(),
            Some("what does the report say about revenue?")
        );
        match outcome {
            InjectionOutcome::Injected(injected) => assert_eq!(injected.mode, SearchMode::Vector),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn vector_incapable_backend_never_gets_a_query() {
        let retrieval = Arc::new(CannedRetrieval::new(
            false,
            vec![doc_context("job-1", "report.pdf", &["body"])],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        injector
            .inject(
                "what does the report say about revenue?",
                &refs(&[("job-1", "report.pdf")]),
            )
            .await;
        assert!(retrieval.last_request().query.is_none());
    }

    #[tokio::test]
    async fn retrieval_timeout_degrades_to_unavailable() {
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let config = InjectorConfig {
            call_timeout: Duration::from_millis(50),
            ..InjectorConfig::default()
        };
        let injector = ContextInjector::new(Arc::new(HangingRetrieval), store, config);

        let outcome = injector
            .inject("what changed?", &refs(&[("job-1", "report.pdf")]))
            .await;

        match outcome {
            InjectionOutcome::Unavailable { error } => assert!(matches!(
                error,
                SwitchboardError::Timeout { ref operation, .. } if operation == "retrieval"
            )),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_no_documents() {
        let retrieval = Arc::new(CannedRetrieval::new(false, vec![]));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store.clone());

        let outcome = injector
            .inject("what changed?", &refs(&[("job-1", "report.pdf")]))
            .await;

        assert_eq!(outcome, InjectionOutcome::NoDocuments);
        // Nothing was injected, so the job must not advance.
        assert_eq!(store.job("job-1").unwrap().stage, JobStage::Indexed);
    }

    #[tokio::test]
    async fn injected_block_lists_files_and_chunks() {
        let retrieval = Arc::new(CannedRetrieval::new(
            false,
            vec![
                doc_context("job-1", "report.pdf", &["Revenue grew 12%.", "Costs flat."]),
                doc_context("job-2", "notes.txt", &["March meeting notes."]),
            ],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        store.seed(ProcessingJob::new("job-2", JobStage::Extracted, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        let outcome = injector
            .inject(
                "what happened this quarter?",
                &refs(&[("job-1", "report.pdf"), ("job-2", "notes.txt")]),
            )
            .await;

        let injected = match outcome {
            InjectionOutcome::Injected(injected) => injected,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(injected.block.starts_with("<document-context>"));
        assert!(injected.block.contains("### report.pdf"));
        assert!(injected.block.contains("### notes.txt"));
        assert!(injected.block.contains("Revenue grew 12%."));
        assert!(injected.block.contains("</document-context>"));
        assert_eq!(injected.chunk_count, 3);
        assert_eq!(
            injected.file_names,
            vec!["report.pdf".to_string(), "notes.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn reinjection_leaves_a_single_history_entry() {
        let retrieval = Arc::new(CannedRetrieval::new(
            false,
            vec![doc_context("job-1", "report.pdf", &["body"])],
        ));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Indexed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store.clone());

        let documents = refs(&[("job-1", "report.pdf")]);
        injector.inject("what changed?", &documents).await;
        injector.inject("what changed?", &documents).await;

        let job = store.job("job-1").unwrap();
        assert_eq!(job.stage, JobStage::Injected);
        let injected_entries = job
            .stage_history
            .iter()
            .filter(|t| t.stage == JobStage::Injected)
            .count();
        assert_eq!(injected_entries, 1);
    }

    #[tokio::test]
    async fn all_failed_jobs_answer_without_context() {
        let retrieval = Arc::new(CannedRetrieval::new(false, vec![]));
        let store = Arc::new(InMemoryJobStore::new());
        store.seed(ProcessingJob::new("job-1", JobStage::Failed, Utc::now()));
        let injector = injector_with(retrieval.clone(), store);

        let outcome = injector
            .inject("what changed?", &refs(&[("job-1", "report.pdf")]))
            .await;

        assert_eq!(outcome, InjectionOutcome::NoDocuments);
        assert_eq!(retrieval.request_count(), 0);
    }

    #[test]
    fn greeting_detection_handles_case_and_punctuation() {
        assert!(is_bare_greeting("hello"));
        assert!(is_bare_greeting("  Hello!  "));
        assert!(is_bare_greeting("GOOD MORNING!!"));
        assert!(!is_bare_greeting("hello, what does the report say?"));
        assert!(!is_bare_greeting(""));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The still-processing message names every pending file and is
        /// deterministic for a given file list.
        #[test]
        fn prop_still_processing_names_every_file(
            names in proptest::collection::vec("[a-z]{1,12}\\.(pdf|txt|csv)", 1..6)
        ) {
            let message = still_processing_message(&names);
            for name in &names {
                prop_assert!(message.contains(name.as_str()));
            }
            prop_assert_eq!(still_processing_message(&names), message);
        }

        /// Greetings stay greetings under trailing punctuation and casing.
        #[test]
        fn prop_greetings_survive_punctuation_and_case(
            index in 0usize..11,
            suffix in "[!?.,]{0,3}",
            upper in proptest::bool::ANY,
        ) {
            const GREETINGS: [&str; 11] = [
                "hi", "hello", "hey", "yo", "sup", "hiya", "howdy", "hola",
                "good morning", "good afternoon", "good evening",
            ];
            let base = GREETINGS[index];
            let cased = if upper { base.to_uppercase() } else { base.to_string() };
            let greeting = format!("{cased}{suffix}");
            prop_assert!(is_bare_greeting(&greeting));
        }

        /// Any three-word query is more than a greeting.
        #[test]
        fn prop_multiword_queries_are_not_bare_greetings(
            words in proptest::collection::vec("[a-z]{1,8}", 3..5)
        ) {
            prop_assert!(!is_bare_greeting(&words.join(" ")));
        }
    }
}
