//! Anthropic Messages API request and streaming event types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChatMessage, ChatRequest};

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: Vec<RequestBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Map the provider-agnostic request onto the Messages API shape.
/// System messages hoist into the top-level `system` field; consecutive
/// tool results merge into one user message, which the API requires.
pub fn to_wire(request: &ChatRequest, model: &str) -> MessagesRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<WireMessage> = Vec::new();

    for message in &request.messages {
        match message {
            ChatMessage::System { content } => system_parts.push(content),
            ChatMessage::User { content } => messages.push(WireMessage {
                role: "user",
                content: vec![RequestBlock::Text {
                    text: content.clone(),
                }],
            }),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if !content.is_empty() {
                    blocks.push(RequestBlock::Text {
                        text: content.clone(),
                    });
                }
                for call in tool_calls {
                    blocks.push(RequestBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                messages.push(WireMessage {
                    role: "assistant",
                    content: blocks,
                });
            }
            ChatMessage::ToolResult {
                tool_call_id,
                content,
            } => {
                let block = RequestBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: content.clone(),
                };
                match messages.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last
                                .content
                                .iter()
                                .all(|b| matches!(b, RequestBlock::ToolResult { .. })) =>
                    {
                        last.content.push(block);
                    }
                    _ => messages.push(WireMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    MessagesRequest {
        model: model.to_string(),
        messages,
        max_tokens: request.max_tokens,
        stream: true,
        system,
        temperature: request.temperature,
        tools: request
            .tools
            .iter()
            .map(|tool| WireTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
            })
            .collect(),
    }
}

// ============================================================================
// STREAMING EVENT TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorDetail,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, rename = "type")]
    pub error_type: String,
    pub message: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolCallRequest, ToolSpec};
    use serde_json::json;

    #[test]
    fn system_messages_hoist_to_top_level() {
        let request = ChatRequest::new(vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::system("Context follows."),
            ChatMessage::user("hi"),
        ]);
        let wire = to_wire(&request, "claude-test");
        assert_eq!(
            wire.system.as_deref(),
            Some("You are helpful.\n\nContext follows.")
        );
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
    }

    #[test]
    fn consecutive_tool_results_merge_into_one_user_message() {
        let request = ChatRequest::new(vec![
            ChatMessage::user("run both"),
            ChatMessage::assistant_with_tools(
                "",
                vec![
                    ToolCallRequest {
                        id: "a".to_string(),
                        name: "web__search".to_string(),
                        arguments: json!({"query": "x"}),
                    },
                    ToolCallRequest {
                        id: "b".to_string(),
                        name: "browser__snapshot".to_string(),
                        arguments: json!({}),
                    },
                ],
            ),
            ChatMessage::tool_result("a", "result a"),
            ChatMessage::tool_result("b", "result b"),
        ]);
        let wire = to_wire(&request, "claude-test");
        assert_eq!(wire.messages.len(), 3);
        assert_eq!(wire.messages[2].role, "user");
        assert_eq!(wire.messages[2].content.len(), 2);
    }

    #[test]
    fn tools_serialize_with_input_schema() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_tools(vec![ToolSpec {
            name: "web__search".to_string(),
            description: "Search the web".to_string(),
            input_schema: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }]);
        let wire = to_wire(&request, "claude-test");
        let rendered = serde_json::to_value(&wire).unwrap();
        assert_eq!(rendered["tools"][0]["name"], "web__search");
        assert!(rendered["tools"][0]["input_schema"].is_object());
        assert_eq!(rendered["stream"], true);
    }

    #[test]
    fn empty_tools_field_is_omitted() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let rendered = serde_json::to_value(to_wire(&request, "claude-test")).unwrap();
        assert!(rendered.get("tools").is_none());
    }

    #[test]
    fn stream_events_deserialize() {
        let start: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"web__search","input":{}}}"#,
        )
        .unwrap();
        match start {
            StreamEvent::ContentBlockStart {
                index,
                content_block: StartBlock::ToolUse { id, name },
            } => {
                assert_eq!(index, 1);
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "web__search");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let delta: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            StreamEvent::ContentBlockDelta {
                delta: ContentDelta::TextDelta { .. },
                ..
            }
        ));

        let stop: StreamEvent = serde_json::from_str(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":10}}"#,
        )
        .unwrap();
        match stop {
            StreamEvent::MessageDelta { delta } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_do_not_fail_deserialization() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"brand_new_event","payload":42}"#).unwrap();
        assert!(matches!(event, StreamEvent::Unknown));
    }
}
