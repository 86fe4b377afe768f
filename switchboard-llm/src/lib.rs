//! Switchboard LLM - provider abstraction for streaming chat.
//!
//! Defines the [`ChatProvider`] trait the engine talks to, the
//! provider-agnostic request and stream-event types, and the
//! [`ProviderRegistry`] providers are explicitly registered into.
//! Concrete HTTP implementations live under [`providers`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::LlmError;

pub mod providers;
pub mod sse;

pub use providers::{AnthropicProvider, OpenAiProvider};

// ============================================================================
// CHAT REQUEST TYPES
// ============================================================================

/// One message in the conversation sent to a provider. The shape is
/// provider-agnostic; each provider maps it onto its own wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    /// Result of a tool call, fed back for the next model turn.
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        ChatMessage::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// A tool definition offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub input_schema: Value,
}

/// A complete tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Provider-agnostic chat request. `tools` is always a concrete list;
/// "no tools" is the empty vector, never an absent field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

// ============================================================================
// STREAM EVENT TYPES
// ============================================================================

/// Why the model stopped emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

impl StopReason {
    /// Total mapping from provider wire strings; anything unrecognized
    /// becomes `Other`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "end_turn" | "stop" | "stop_sequence" => StopReason::EndTurn,
            "tool_use" | "tool_calls" | "function_call" => StopReason::ToolUse,
            "max_tokens" | "length" => StopReason::MaxTokens,
            _ => StopReason::Other,
        }
    }
}

/// One incremental event from a provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    /// A fragment of assistant text.
    TextDelta(String),
    /// The model opened a tool call; arguments follow as deltas.
    ToolCallStarted { id: String, name: String },
    /// A fragment of the JSON arguments for an open tool call.
    ToolCallDelta {
        id: String,
        arguments_fragment: String,
    },
    /// The message finished; always the last event of a healthy stream.
    MessageCompleted { stop_reason: StopReason },
}

/// Boxed event stream returned by providers.
pub type ChatStream = BoxStream<'static, Result<ChatStreamEvent, LlmError>>;

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// A streaming chat model backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name used in registry lookups and error messages.
    fn name(&self) -> &str;

    /// Whether this provider accepts tool definitions. Providers without
    /// tool support can still serve plain chat turns.
    fn supports_tools(&self) -> bool;

    /// Open one streaming chat completion.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError>;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry of chat providers. Providers are explicitly registered; the
/// first one registered becomes the default unless overridden.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a provider under its own name. Replaces any provider
    /// previously registered under that name.
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        let name = provider.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Make a registered provider the default.
    pub fn set_default(&mut self, name: &str) -> Result<(), LlmError> {
        if !self.providers.contains_key(name) {
            return Err(LlmError::ProviderNotConfigured {
                provider: name.to_string(),
            });
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ChatProvider>, LlmError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotConfigured {
                provider: name.to_string(),
            })
    }

    /// The default provider, or `ProviderNotConfigured` when the registry
    /// is empty. Callers turn that error into the apologetic
    /// no-credentials message instead of crashing the turn.
    pub fn default_provider(&self) -> Result<Arc<dyn ChatProvider>, LlmError> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| LlmError::ProviderNotConfigured {
                provider: "default".to_string(),
            })?;
        self.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names();
        names.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .field("default", &self.default_name)
            .finish()
    }
}

// ============================================================================
// STREAM COLLECTOR
// ============================================================================

/// A fully accumulated model message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: StopReason,
}

/// Accumulates stream events into a [`ChatCompletion`]. Both execution
/// strategies forward deltas to the event channel while feeding the same
/// events through a collector, so the turn loop sees one coherent message
/// at the end.
#[derive(Debug, Default)]
pub struct StreamCollector {
    text: String,
    // (id, name, raw argument json buffer) in call-open order
    calls: Vec<(String, String, String)>,
    stop_reason: Option<StopReason>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, event: &ChatStreamEvent) {
        match event {
            ChatStreamEvent::TextDelta(delta) => self.text.push_str(delta),
            ChatStreamEvent::ToolCallStarted { id, name } => {
                self.calls.push((id.clone(), name.clone(), String::new()));
            }
            ChatStreamEvent::ToolCallDelta {
                id,
                arguments_fragment,
            } => {
                if let Some((_, _, buffer)) = self.calls.iter_mut().find(|(cid, _, _)| cid == id) {
                    buffer.push_str(arguments_fragment);
                }
            }
            ChatStreamEvent::MessageCompleted { stop_reason } => {
                self.stop_reason = Some(*stop_reason);
            }
        }
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True once a `MessageCompleted` event has been absorbed.
    pub fn is_complete(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Finalize into a completion. Argument buffers that fail to parse as
    /// JSON are preserved as raw strings rather than dropped.
    pub fn finish(self) -> ChatCompletion {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(id, name, buffer)| {
                let arguments = if buffer.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&buffer).unwrap_or(Value::String(buffer))
                };
                ToolCallRequest {
                    id,
                    name,
                    arguments,
                }
            })
            .collect();
        ChatCompletion {
            text: self.text,
            tool_calls,
            stop_reason: self.stop_reason.unwrap_or(StopReason::Other),
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedProvider(&'static str, bool);

    #[async_trait]
    impl ChatProvider for NamedProvider {
        fn name(&self) -> &str {
            self.0
        }

        fn supports_tools(&self) -> bool {
            self.1
        }

        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, LlmError> {
            Err(LlmError::StreamClosed {
                provider: self.0.to_string(),
                reason: "test provider".to_string(),
            })
        }
    }

    #[test]
    fn empty_registry_reports_not_configured() {
        let registry = ProviderRegistry::new();
        match registry.default_provider() {
            Err(err) => assert!(matches!(err, LlmError::ProviderNotConfigured { .. })),
            Ok(_) => panic!("expected a not-configured error"),
        }
    }

    #[test]
    fn first_registered_provider_is_default() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("anthropic", true)));
        registry.register(Arc::new(NamedProvider("openai", true)));
        assert_eq!(registry.default_provider().unwrap().name(), "anthropic");

        registry.set_default("openai").unwrap();
        assert_eq!(registry.default_provider().unwrap().name(), "openai");
    }

    #[test]
    fn set_default_rejects_unknown_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("anthropic", true)));
        assert!(registry.set_default("mistral").is_err());
    }

    #[test]
    fn collector_accumulates_text_and_tool_calls() {
        let mut collector = StreamCollector::new();
        collector.absorb(&ChatStreamEvent::TextDelta("Let me ".to_string()));
        collector.absorb(&ChatStreamEvent::TextDelta("check.".to_string()));
        collector.absorb(&ChatStreamEvent::ToolCallStarted {
            id: "call_1".to_string(),
            name: "email-mcp__send_test_email".to_string(),
        });
        collector.absorb(&ChatStreamEvent::ToolCallDelta {
            id: "call_1".to_string(),
            arguments_fragment: r#"{"subject":"#.to_string(),
        });
        collector.absorb(&ChatStreamEvent::ToolCallDelta {
            id: "call_1".to_string(),
            arguments_fragment: r#""Weekly Report"}"#.to_string(),
        });
        collector.absorb(&ChatStreamEvent::MessageCompleted {
            stop_reason: StopReason::ToolUse,
        });

        assert!(collector.is_complete());
        let completion = collector.finish();
        assert_eq!(completion.text, "Let me check.");
        assert_eq!(completion.stop_reason, StopReason::ToolUse);
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(
            completion.tool_calls[0].arguments,
            json!({"subject": "Weekly Report"})
        );
    }

    #[test]
    fn collector_preserves_unparseable_arguments_as_string() {
        let mut collector = StreamCollector::new();
        collector.absorb(&ChatStreamEvent::ToolCallStarted {
            id: "call_1".to_string(),
            name: "web__search".to_string(),
        });
        collector.absorb(&ChatStreamEvent::ToolCallDelta {
            id: "call_1".to_string(),
            arguments_fragment: "{not valid json".to_string(),
        });
        let completion = collector.finish();
        assert_eq!(
            completion.tool_calls[0].arguments,
            Value::String("{not valid json".to_string())
        );
    }

    #[test]
    fn collector_empty_arguments_become_empty_object() {
        let mut collector = StreamCollector::new();
        collector.absorb(&ChatStreamEvent::ToolCallStarted {
            id: "call_1".to_string(),
            name: "browser__snapshot".to_string(),
        });
        let completion = collector.finish();
        assert_eq!(completion.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn collector_without_completion_reports_other() {
        let mut collector = StreamCollector::new();
        collector.absorb(&ChatStreamEvent::TextDelta("partial".to_string()));
        assert!(!collector.is_complete());
        assert_eq!(collector.finish().stop_reason, StopReason::Other);
    }

    #[test]
    fn chat_request_defaults_to_no_tools() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        assert!(request.tools.is_empty());
        assert_eq!(request.max_tokens, 4096);
    }

    #[test]
    fn registry_debug_lists_names_not_internals() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NamedProvider("anthropic", true)));
        let rendered = format!("{registry:?}");
        assert!(rendered.contains("anthropic"));
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
