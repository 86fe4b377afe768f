//! The turn pipeline: request in, record stream out.
//!
//! `TurnEngine` owns every collaborator a turn needs and exposes exactly
//! one entry point, [`TurnEngine::handle_turn`]. The returned receiver
//! yields content and log records and is always closed by a single `Done`
//! sentinel, no matter how the turn ended: validated, short-circuited,
//! answered, degraded, or timed out.
//!
//! Error philosophy: nothing after validation returns `Err` to the
//! caller. Failures become an error log record plus an apologetic content
//! record, so the transport never has to represent a failed response
//! differently from a successful one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use switchboard_command::{CommandCatalog, CommandDispatcher};
use switchboard_context::{ContextInjector, InjectionOutcome};
use switchboard_core::message::latest_user_message;
use switchboard_core::{
    new_request_id, ConversationMessage, DocumentRef, EngineConfig, ErrorClass, ExecutionEvent,
    Intent, LogRecord, StreamRecord, SuggestedTool, SwitchboardError, ValidationError,
};
use switchboard_llm::ProviderRegistry;

use crate::classifier::classify_query;
use crate::selector::{ConnectTimedProvider, TurnStrategies};

/// Hard cap on the latest user message, in characters.
pub const MAX_QUERY_CHARS: usize = 8_000;

const BASE_SYSTEM_PROMPT: &str = "You are Switchboard, an assistant that answers questions, \
searches documents and the web, runs commands on connected integrations, and remembers facts \
the user asks you to keep. Answer directly and concretely. When a connected command can do \
what the user asked, use it instead of guessing.";

/// One conversational turn as the caller submits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Full conversation, oldest first. The latest user message is the
    /// query being answered.
    pub messages: Vec<ConversationMessage>,
    /// Uploaded documents this conversation may reference.
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
    /// Provider to use instead of the registry default.
    #[serde(default)]
    pub provider: Option<String>,
    /// Caller credential for authenticated commands. Set from transport
    /// headers, never from the request body.
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

impl TurnRequest {
    pub fn new(messages: Vec<ConversationMessage>) -> Self {
        Self {
            messages,
            documents: Vec::new(),
            provider: None,
            bearer_token: None,
        }
    }
}

/// The engine behind every turn.
pub struct TurnEngine {
    registry: Arc<ProviderRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    catalog: Arc<CommandCatalog>,
    injector: Arc<ContextInjector>,
    config: EngineConfig,
}

impl TurnEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<CommandDispatcher>,
        catalog: Arc<CommandCatalog>,
        injector: Arc<ContextInjector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            catalog,
            injector,
            config,
        }
    }

    /// Names of the registered model providers. Empty when the engine is
    /// running without credentials.
    pub fn provider_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle one turn. The turn runs on its own task; the receiver sees
    /// records as they happen and exactly one `Done` as the final record.
    pub fn handle_turn(self: &Arc<Self>, request: TurnRequest) -> mpsc::Receiver<StreamRecord> {
        let (records_tx, records_rx) = mpsc::channel(self.config.channel_capacity);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_turn(request, records_tx).await;
        });
        records_rx
    }

    async fn run_turn(&self, request: TurnRequest, records: mpsc::Sender<StreamRecord>) {
        let request_id = new_request_id();

        let query = match validate(&request) {
            Ok(query) => query.to_string(),
            Err(error) => {
                tracing::info!(%request_id, %error, "rejected turn request");
                report_failure(&records, &error).await;
                finish(&records).await;
                return;
            }
        };

        let classification = classify_query(&query, &request.documents);
        tracing::info!(
            %request_id,
            intent = classification.intent.as_db_str(),
            confidence = classification.confidence,
            documents = request.documents.len(),
            "turn started"
        );

        let provider = match &request.provider {
            Some(name) => self.registry.get(name),
            None => self.registry.default_provider(),
        };
        let provider = match provider {
            Ok(provider) => provider,
            Err(error) => {
                let error = SwitchboardError::from(error);
                tracing::warn!(%request_id, %error, "no usable model provider");
                report_failure(&records, &error).await;
                finish(&records).await;
                return;
            }
        };
        let provider = Arc::new(ConnectTimedProvider::new(
            provider,
            self.config.provider_connect_timeout,
        ));

        let mut system_prompt = BASE_SYSTEM_PROMPT.to_string();
        if classification.intent == Intent::Memory {
            if let Some(hint) = memory_hint(classification.suggested_tool) {
                system_prompt.push_str(hint);
            }
        }

        match self.injector.inject(&query, &request.documents).await {
            InjectionOutcome::NoDocuments => {}
            InjectionOutcome::StillProcessing { message } => {
                // Complete answer for this turn; the model is never called.
                tracing::info!(%request_id, "documents still processing, short-circuiting");
                let _ = records.send(StreamRecord::content(message)).await;
                finish(&records).await;
                return;
            }
            InjectionOutcome::Injected(context) => {
                tracing::info!(
                    %request_id,
                    mode = %context.mode,
                    chunks = context.chunk_count,
                    files = context.file_names.len(),
                    "document context injected"
                );
                system_prompt = format!("{}\n\n{}", context.block, system_prompt);
            }
            InjectionOutcome::Unavailable { error } => {
                if error.classify() == ErrorClass::UpstreamTimeout {
                    tracing::warn!(%request_id, %error, "context retrieval timed out");
                    report_failure(&records, &error).await;
                    finish(&records).await;
                    return;
                }
                // Degrade to an answer without document context.
                tracing::warn!(%request_id, %error, "context unavailable, answering without it");
            }
        }

        let mut strategies = TurnStrategies::new(
            provider,
            self.dispatcher.clone(),
            self.catalog.clone(),
            self.config.max_turns,
        );
        if let Some(token) = &request.bearer_token {
            strategies = strategies.with_bearer_token(token.clone());
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity);
        let conversation = request.messages.clone();
        let handle = tokio::spawn(async move {
            strategies
                .execute(&classification, &system_prompt, &conversation, &events_tx)
                .await
        });

        let mut normalizer = crate::normalizer::EventNormalizer::new(&self.config);
        match normalizer.pump(events_rx, &records).await {
            crate::normalizer::NormalizerOutcome::DeadlineExceeded => {
                handle.abort();
                let error = SwitchboardError::timeout("turn", self.config.request_deadline);
                tracing::error!(%request_id, %error, "turn deadline exceeded");
                report_failure(&records, &error).await;
            }
            crate::normalizer::NormalizerOutcome::Drained => match handle.await {
                Ok(Ok(outcome)) => {
                    if outcome.content_chars == 0 {
                        let error = SwitchboardError::Internal(
                            "turn finished without producing content".to_string(),
                        );
                        tracing::error!(%request_id, "turn produced no content");
                        report_failure(&records, &error).await;
                    } else {
                        tracing::info!(
                            %request_id,
                            strategy = ?outcome.strategy,
                            fell_back = outcome.fell_back,
                            content_chars = outcome.content_chars,
                            "turn completed"
                        );
                    }
                }
                Ok(Err(error)) => {
                    tracing::error!(%request_id, %error, "turn failed");
                    report_failure(&records, &error).await;
                }
                Err(join_error) => {
                    tracing::error!(%request_id, %join_error, "turn task panicked");
                    let error =
                        SwitchboardError::Internal("turn task aborted unexpectedly".to_string());
                    report_failure(&records, &error).await;
                }
            },
        }

        finish(&records).await;
    }
}

fn validate(request: &TurnRequest) -> Result<&str, SwitchboardError> {
    if request.messages.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "messages".to_string(),
        }
        .into());
    }
    let latest = latest_user_message(&request.messages).ok_or_else(|| {
        SwitchboardError::from(ValidationError::InvalidValue {
            field: "messages".to_string(),
            reason: "no user message in the conversation".to_string(),
        })
    })?;
    let query = latest.content.trim();
    if query.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "messages".to_string(),
            reason: "latest user message is empty".to_string(),
        }
        .into());
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            limit: MAX_QUERY_CHARS,
        }
        .into());
    }
    Ok(query)
}

fn memory_hint(tool: Option<SuggestedTool>) -> Option<&'static str> {
    match tool {
        Some(SuggestedTool::StoreMemory) => Some(
            "\n\nThe user wants something remembered. Use the /memory store command to save it.",
        ),
        Some(SuggestedTool::QueryMemory) => Some(
            "\n\nThe user is asking about something previously shared. Use the /memory recall \
             command to look it up.",
        ),
        _ => None,
    }
}

/// Put the failure on the transport: a structured error log record, then
/// the user-facing apology as content.
async fn report_failure(records: &mpsc::Sender<StreamRecord>, error: &SwitchboardError) {
    let event = ExecutionEvent::error(error.classify(), error.to_string());
    if let Some(log) = LogRecord::from_event(&event) {
        let _ = records.send(StreamRecord::Log(log)).await;
    }
    let _ = records
        .send(StreamRecord::content(error.user_message()))
        .await;
}

async fn finish(records: &mpsc::Sender<StreamRecord>) {
    let _ = records.send(StreamRecord::Done).await;
}

// ============================================================================
// Tests
// ============================================================================
