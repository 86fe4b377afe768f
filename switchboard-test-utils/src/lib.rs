//! Switchboard Test Utilities
//!
//! Centralized test infrastructure for the Switchboard workspace:
//! - Scripted mocks for the chat-provider and command-gateway seams
//! - Proptest generators for core entity types
//! - Fixtures for conversations, jobs, and document chunks
//! - Assertions for stream-record sequences

// Re-export in-memory collaborators from their source crate
pub use switchboard_context::{InMemoryJobStore, InMemoryRetrievalService};

// Re-export core types for convenience
pub use switchboard_core::{
    CommandError, ContextChunk, ConversationMessage, DocumentContext, DocumentRef, ErrorClass,
    ExecutionEvent, Intent, IntentClassification, IntentContext, JobStage, LlmError, LogRecord,
    MessageRole, ParsedCommand, ProcessingJob, StreamRecord, SuggestedTool, SwitchboardError,
    SwitchboardResult, Timestamp,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use switchboard_command::{CommandGateway, CommandInvocation, CommandOutcome};
use switchboard_llm::{ChatProvider, ChatRequest, ChatStream, ChatStreamEvent, StopReason};

/// Mock state is test-only, so a poisoned lock just yields the inner data.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SCRIPTED CHAT PROVIDER
// ============================================================================

/// Chat provider that replays pre-built event scripts instead of calling a
/// model. Scripts queued with [`with_script`](Self::with_script) are consumed
/// in order, one per `stream_chat` call; once the queue is empty the
/// [`repeating`](Self::repeating) script answers every further call, and
/// without one the reply is a bare completed message.
pub struct ScriptedChatProvider {
    name: String,
    supports_tools: bool,
    scripts: Mutex<VecDeque<Vec<ChatStreamEvent>>>,
    repeat: Option<Vec<ChatStreamEvent>>,
    failure: Option<LlmError>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supports_tools: true,
            scripts: Mutex::new(VecDeque::new()),
            repeat: None,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Report no function-calling support, as plain-chat providers do.
    pub fn without_tool_support(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    /// Queue one script; each `stream_chat` call consumes the next.
    pub fn with_script(self, events: Vec<ChatStreamEvent>) -> Self {
        relock(&self.scripts).push_back(events);
        self
    }

    /// Script replayed for every call after the queue is exhausted.
    pub fn repeating(mut self, events: Vec<ChatStreamEvent>) -> Self {
        self.repeat = Some(events);
        self
    }

    /// Fail every call with clones of this error.
    pub fn failing(mut self, error: LlmError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        relock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        relock(&self.requests).len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        relock(&self.requests).push(request);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let events = relock(&self.scripts)
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| {
                vec![ChatStreamEvent::MessageCompleted {
                    stop_reason: StopReason::EndTurn,
                }]
            });
        Ok(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }
}

/// Script for a plain prose reply that ends the model turn.
pub fn text_message(text: impl Into<String>) -> Vec<ChatStreamEvent> {
    vec![
        ChatStreamEvent::TextDelta(text.into()),
        ChatStreamEvent::MessageCompleted {
            stop_reason: StopReason::EndTurn,
        },
    ]
}

/// Script for a reply that requests tool calls after optional prose. Each
/// `(id, name, arguments)` triple becomes one opened call with its arguments
/// delivered as a single fragment.
pub fn tool_call_message(
    text: impl Into<String>,
    calls: Vec<(&str, &str, Value)>,
) -> Vec<ChatStreamEvent> {
    let mut events = Vec::new();
    let text = text.into();
    if !text.is_empty() {
        events.push(ChatStreamEvent::TextDelta(text));
    }
    for (id, name, arguments) in calls {
        events.push(ChatStreamEvent::ToolCallStarted {
            id: id.to_string(),
            name: name.to_string(),
        });
        events.push(ChatStreamEvent::ToolCallDelta {
            id: id.to_string(),
            arguments_fragment: arguments.to_string(),
        });
    }
    events.push(ChatStreamEvent::MessageCompleted {
        stop_reason: StopReason::ToolUse,
    });
    events
}

// ============================================================================
// RECORDING COMMAND GATEWAY
// ============================================================================

/// Command gateway that records every invocation and answers from a queue of
/// scripted outcomes, falling back to a fixed outcome once the queue is
/// empty.
pub struct RecordingGateway {
    outcomes: Mutex<VecDeque<Result<CommandOutcome, CommandError>>>,
    fallback: CommandOutcome,
    invocations: Mutex<Vec<CommandInvocation>>,
}

impl RecordingGateway {
    /// Gateway whose fallback reports plain success.
    pub fn new() -> Self {
        Self::succeeding(json!({ "ok": true }))
    }

    /// Gateway whose fallback succeeds with `result`.
    pub fn succeeding(result: Value) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: CommandOutcome::Success { result },
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Queue one outcome; each `execute` call consumes the next.
    pub fn with_outcome(self, outcome: Result<CommandOutcome, CommandError>) -> Self {
        relock(&self.outcomes).push_back(outcome);
        self
    }

    /// Invocations seen so far, in call order.
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        relock(&self.invocations).clone()
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandGateway for RecordingGateway {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandOutcome, CommandError> {
        relock(&self.invocations).push(invocation.clone());
        relock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Switchboard core types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp within 2020..2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Generate an Intent variant.
    pub fn arb_intent() -> impl Strategy<Value = Intent> {
        prop_oneof![
            Just(Intent::Document),
            Just(Intent::Web),
            Just(Intent::Command),
            Just(Intent::Memory),
            Just(Intent::Hybrid),
            Just(Intent::Unknown),
        ]
    }

    /// Generate a SuggestedTool variant.
    pub fn arb_suggested_tool() -> impl Strategy<Value = SuggestedTool> {
        prop_oneof![
            Just(SuggestedTool::SearchDocuments),
            Just(SuggestedTool::WebSearch),
            Just(SuggestedTool::ExecuteCommand),
            Just(SuggestedTool::StoreMemory),
            Just(SuggestedTool::QueryMemory),
        ]
    }

    /// Generate a JobStage variant.
    pub fn arb_job_stage() -> impl Strategy<Value = JobStage> {
        prop_oneof![
            Just(JobStage::Registered),
            Just(JobStage::Uploaded),
            Just(JobStage::Processing),
            Just(JobStage::Extracted),
            Just(JobStage::Indexed),
            Just(JobStage::Injected),
            Just(JobStage::Failed),
        ]
    }

    /// Generate an ErrorClass variant.
    pub fn arb_error_class() -> impl Strategy<Value = ErrorClass> {
        prop_oneof![
            Just(ErrorClass::Validation),
            Just(ErrorClass::UpstreamTimeout),
            Just(ErrorClass::CapabilityIncompatibility),
            Just(ErrorClass::UpstreamProvider),
            Just(ErrorClass::CommandExecution),
            Just(ErrorClass::AuthenticationRequired),
            Just(ErrorClass::Internal),
        ]
    }

    /// Generate an ExecutionEvent of any variant with printable payloads.
    pub fn arb_execution_event() -> impl Strategy<Value = ExecutionEvent> {
        let agent = prop_oneof![Just(None), "[a-z_]{1,12}".prop_map(Some)];
        let text = "[a-zA-Z0-9 .,?!]{1,60}";
        prop_oneof![
            (agent.clone(), text).prop_map(|(a, t)| ExecutionEvent::content(a, t)),
            (agent.clone(), "[a-z_]{1,16}", text).prop_map(|(a, tool, cmd)| {
                ExecutionEvent::tool_call(a, tool, Some(cmd), json!({}))
            }),
            (agent.clone(), "[a-z_]{1,16}", text).prop_map(|(a, tool, out)| {
                ExecutionEvent::tool_result(a, tool, None, json!({ "output": out }))
            }),
            (arb_error_class(), text).prop_map(|(class, msg)| ExecutionEvent::error(class, msg)),
            text.prop_map(|msg| ExecutionEvent::system(msg, None)),
            (agent, text).prop_map(|(a, t)| ExecutionEvent::final_output(a, t)),
        ]
    }

    /// Generate a conversation whose final message is from the user.
    pub fn arb_conversation() -> impl Strategy<Value = Vec<ConversationMessage>> {
        let turn = ("[a-zA-Z0-9 ,.?]{1,40}", any::<bool>()).prop_map(|(text, from_user)| {
            if from_user {
                ConversationMessage::user(text)
            } else {
                ConversationMessage::assistant(text)
            }
        });
        (
            proptest::collection::vec(turn, 0..6),
            "[a-zA-Z0-9 ,.?]{1,40}",
        )
            .prop_map(|(mut messages, question)| {
                messages.push(ConversationMessage::user(question));
                messages
            })
    }

    /// Generate a well-formed slash command string.
    pub fn arb_command_string() -> impl Strategy<Value = String> {
        let server = "[a-z][a-z0-9-]{0,11}";
        let command = "[a-z][a-z0-9_]{0,11}";
        let arg = ("[a-z][a-z0-9_]{0,7}", "[a-zA-Z0-9.-]{1,12}");
        (server, command, proptest::collection::vec(arg, 0..3)).prop_map(
            |(server, command, args)| {
                let mut text = format!("/{server} {command}");
                for (key, value) in args {
                    text.push_str(&format!(" {key}={value}"));
                }
                text
            },
        )
    }

    /// Generate a DocumentRef with an optional advisory stage.
    pub fn arb_document_ref() -> impl Strategy<Value = DocumentRef> {
        (
            "[a-f0-9]{8}",
            "[a-z]{3,10}",
            prop_oneof![Just(None), arb_job_stage().prop_map(Some)],
        )
            .prop_map(|(id, stem, status)| {
                let mut doc = DocumentRef::new(id, format!("{stem}.pdf"));
                doc.status = status;
                doc
            })
    }

    /// Generate a ProcessingJob at an arbitrary stage.
    pub fn arb_processing_job() -> impl Strategy<Value = ProcessingJob> {
        ("[a-f0-9]{8}", arb_job_stage(), arb_timestamp())
            .prop_map(|(id, stage, at)| ProcessingJob::new(id, stage, at))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common turn scenarios.

    use super::*;

    /// Single-message conversation holding one user question.
    pub fn conversation(text: &str) -> Vec<ConversationMessage> {
        vec![ConversationMessage::user(text)]
    }

    /// Multi-turn conversation ending with a user follow-up.
    pub fn threaded_conversation(follow_up: &str) -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::user("What does the quarterly report say about revenue?"),
            ConversationMessage::assistant("Revenue grew 12% quarter over quarter."),
            ConversationMessage::user(follow_up),
        ]
    }

    /// Job whose document is indexed and ready for retrieval.
    pub fn ready_job(id: &str, file_name: &str) -> ProcessingJob {
        ProcessingJob::new(id, JobStage::Indexed, Utc::now())
            .with_metadata(json!({ "file_name": file_name }))
    }

    /// Job still being prepared.
    pub fn pending_job(id: &str, file_name: &str) -> ProcessingJob {
        ProcessingJob::new(id, JobStage::Processing, Utc::now())
            .with_metadata(json!({ "file_name": file_name }))
    }

    /// Job that failed extraction.
    pub fn failed_job(id: &str) -> ProcessingJob {
        ProcessingJob::new(id, JobStage::Failed, Utc::now())
    }

    /// Document reference as a request carries it.
    pub fn document_ref(id: &str, file_name: &str) -> DocumentRef {
        DocumentRef::new(id, file_name)
    }

    /// Chunks without similarity scores, in seed order.
    pub fn plain_chunks(texts: &[&str]) -> Vec<ContextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| ContextChunk::new(format!("chunk-{i}"), *text))
            .collect()
    }

    /// Chunks carrying vector similarity scores.
    pub fn scored_chunks(texts: &[(&str, f32)]) -> Vec<ContextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, (text, score))| {
                ContextChunk::new(format!("chunk-{i}"), *text).with_similarity(*score)
            })
            .collect()
    }

    /// Classification carrying only an intent, for routing tests.
    pub fn classification(intent: Intent) -> IntentClassification {
        IntentClassification {
            intent,
            confidence: 0.5,
            suggested_tool: None,
            context: IntentContext::default(),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for stream-record sequences and error classification.

    use super::*;
    use std::collections::HashSet;

    fn record_text(record: &StreamRecord) -> Option<&str> {
        match record {
            StreamRecord::Content { content } => Some(content),
            _ => None,
        }
    }

    /// Assert the sequence carries exactly one terminal sentinel, last.
    #[track_caller]
    pub fn assert_single_done(records: &[StreamRecord]) {
        let done_count = records.iter().filter(|r| r.is_done()).count();
        assert_eq!(
            done_count, 1,
            "Expected exactly one Done record, got {done_count}: {records:?}"
        );
        assert!(
            records.last().map(StreamRecord::is_done).unwrap_or(false),
            "Expected Done to be the final record: {records:?}"
        );
    }

    /// Assert no two content records repeat the same trimmed text.
    #[track_caller]
    pub fn assert_no_duplicate_content(records: &[StreamRecord]) {
        let mut seen = HashSet::new();
        for record in records {
            if let Some(text) = record_text(record) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    assert!(
                        seen.insert(trimmed.to_string()),
                        "Duplicate content record: {trimmed:?}"
                    );
                }
            }
        }
    }

    /// Assert some content record contains `needle`.
    #[track_caller]
    pub fn assert_content_contains(records: &[StreamRecord], needle: &str) {
        assert!(
            records
                .iter()
                .filter_map(record_text)
                .any(|text| text.contains(needle)),
            "No content record contains {needle:?}: {records:?}"
        );
    }

    /// Assert an error classifies into the given class.
    #[track_caller]
    pub fn assert_error_class(error: &SwitchboardError, class: ErrorClass) {
        assert_eq!(
            error.classify(),
            class,
            "Wrong class for error: {error:?}"
        );
    }

    /// Content text of every content record, concatenated in order.
    pub fn joined_content(records: &[StreamRecord]) -> String {
        records
            .iter()
            .filter_map(record_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use proptest::prelude::*;
    use switchboard_command::{is_slash_command, parse_command};

    async fn drain(provider: &ScriptedChatProvider, request: ChatRequest) -> Vec<ChatStreamEvent> {
        let mut stream = provider.stream_chat(request).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        events
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![switchboard_llm::ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn scripted_provider_consumes_scripts_in_order() {
        let provider = ScriptedChatProvider::new("mock")
            .with_script(text_message("first"))
            .with_script(text_message("second"));

        let first = drain(&provider, request()).await;
        assert_eq!(first[0], ChatStreamEvent::TextDelta("first".to_string()));
        let second = drain(&provider, request()).await;
        assert_eq!(second[0], ChatStreamEvent::TextDelta("second".to_string()));

        // Queue exhausted and no repeat script: bare completion.
        let third = drain(&provider, request()).await;
        assert_eq!(
            third,
            vec![ChatStreamEvent::MessageCompleted {
                stop_reason: StopReason::EndTurn
            }]
        );
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn scripted_provider_failing_reports_the_error() {
        let provider = ScriptedChatProvider::new("mock").failing(LlmError::RateLimited {
            provider: "mock".to_string(),
            retry_after_ms: 1000,
        });
        let result = provider.stream_chat(request()).await;
        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn recording_gateway_replays_outcomes_then_falls_back() {
        let gateway = RecordingGateway::succeeding(json!({ "sent": true })).with_outcome(Ok(
            CommandOutcome::NotFound {
                message: "nothing matched".to_string(),
            },
        ));
        let invocation = CommandInvocation::new(
            ParsedCommand::new("web", "search").with_arg("query", "cats"),
        )
        .with_bearer_token("token-1");

        let first = gateway.execute(&invocation).await.unwrap();
        assert!(first.is_not_found());
        let second = gateway.execute(&invocation).await.unwrap();
        assert_eq!(
            second,
            CommandOutcome::Success {
                result: json!({ "sent": true })
            }
        );

        let invocations = gateway.invocations();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].command.server_id, "web");
        assert_eq!(invocations[0].bearer_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn text_message_script_ends_the_turn() {
        let events = text_message("hello");
        assert_eq!(
            events.last(),
            Some(&ChatStreamEvent::MessageCompleted {
                stop_reason: StopReason::EndTurn
            })
        );
    }

    #[test]
    fn tool_call_message_opens_each_call() {
        let events = tool_call_message(
            "",
            vec![("call-1", "run_command", json!({ "command": "/web search" }))],
        );
        assert_eq!(
            events[0],
            ChatStreamEvent::ToolCallStarted {
                id: "call-1".to_string(),
                name: "run_command".to_string(),
            }
        );
        assert_eq!(
            events.last(),
            Some(&ChatStreamEvent::MessageCompleted {
                stop_reason: StopReason::ToolUse
            })
        );
    }

    #[test]
    fn ready_job_fixture_is_ready() {
        let job = fixtures::ready_job("job-1", "report.pdf");
        assert!(job.stage.is_ready());
        assert_eq!(job.file_name(), Some("report.pdf"));
    }

    #[test]
    fn single_done_assertion_accepts_a_terminal_done() {
        let records = vec![
            StreamRecord::content("hello"),
            StreamRecord::content("world"),
            StreamRecord::Done,
        ];
        assertions::assert_single_done(&records);
        assertions::assert_no_duplicate_content(&records);
        assertions::assert_content_contains(&records, "world");
        assert_eq!(assertions::joined_content(&records), "helloworld");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_stages_round_trip(stage in generators::arb_job_stage()) {
            prop_assert_eq!(JobStage::from_db_str(stage.as_db_str()), Ok(stage));
        }

        #[test]
        fn prop_generated_events_tag_by_type(event in generators::arb_execution_event()) {
            let value = serde_json::to_value(&event).unwrap();
            prop_assert_eq!(
                value.get("type").and_then(|v| v.as_str()),
                Some(event.kind_str())
            );
        }

        #[test]
        fn prop_generated_command_strings_parse(text in generators::arb_command_string()) {
            prop_assert!(is_slash_command(&text));
            prop_assert!(parse_command(&text).is_ok());
        }

        #[test]
        fn prop_generated_conversations_end_with_the_user(
            messages in generators::arb_conversation()
        ) {
            prop_assert_eq!(
                messages.last().map(|m| m.role),
                Some(MessageRole::User)
            );
        }
    }
}
