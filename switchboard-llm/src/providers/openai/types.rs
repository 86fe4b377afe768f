//! OpenAI Chat Completions API request and streaming chunk types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChatMessage, ChatRequest};

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionsRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// Arguments as a JSON-encoded string, per the wire format.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionDef,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Map the provider-agnostic request onto the Chat Completions shape.
pub fn to_wire(request: &ChatRequest, model: &str) -> ChatCompletionsRequest {
    let messages = request
        .messages
        .iter()
        .map(|message| match message {
            ChatMessage::System { content } => WireMessage {
                role: "system",
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            ChatMessage::User { content } => WireMessage {
                role: "user",
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: if content.is_empty() {
                    None
                } else {
                    Some(content.clone())
                },
                tool_calls: tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: "function",
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: serde_json::to_string(&call.arguments)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            ChatMessage::ToolResult {
                tool_call_id,
                content,
            } => WireMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_call_id.clone()),
            },
        })
        .collect();

    let tools: Vec<WireTool> = request
        .tools
        .iter()
        .map(|tool| WireTool {
            kind: "function",
            function: WireFunctionDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect();
    let tool_choice = if tools.is_empty() { None } else { Some("auto") };

    ChatCompletionsRequest {
        model: model.to_string(),
        messages,
        stream: true,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools,
        tool_choice,
    }
}

// ============================================================================
// STREAMING CHUNK TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<DeltaToolCall>,
}

/// Tool call fragments are keyed by `index`; the first fragment carries
/// the id and name, later ones only argument text.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaToolCall {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<DeltaFunction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
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
    fn request_serializes_tool_definitions() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_tools(vec![ToolSpec {
            name: "web__search".to_string(),
            description: "Search the web".to_string(),
            input_schema: json!({"type": "object"}),
        }]);
        let rendered = serde_json::to_value(to_wire(&request, "gpt-test")).unwrap();
        assert_eq!(rendered["tools"][0]["type"], "function");
        assert_eq!(rendered["tools"][0]["function"]["name"], "web__search");
        assert_eq!(rendered["tool_choice"], "auto");
        assert_eq!(rendered["stream"], true);
    }

    #[test]
    fn plain_request_omits_tool_fields() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let rendered = serde_json::to_value(to_wire(&request, "gpt-test")).unwrap();
        assert!(rendered.get("tools").is_none());
        assert!(rendered.get("tool_choice").is_none());
    }

    #[test]
    fn assistant_tool_calls_encode_arguments_as_string() {
        let request = ChatRequest::new(vec![
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "memory__store".to_string(),
                    arguments: json!({"content": "note"}),
                }],
            ),
            ChatMessage::tool_result("call_1", "stored"),
        ]);
        let rendered = serde_json::to_value(to_wire(&request, "gpt-test")).unwrap();
        let arguments = rendered["messages"][0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(arguments).unwrap(),
            json!({"content": "note"})
        );
        assert_eq!(rendered["messages"][1]["role"], "tool");
        assert_eq!(rendered["messages"][1]["tool_call_id"], "call_1");
    }

    #[test]
    fn stream_chunks_deserialize() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));

        let tool_chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_7","function":{"name":"web__search","arguments":""}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        let call = &tool_chunk.choices[0].delta.tool_calls[0];
        assert_eq!(call.id.as_deref(), Some("call_7"));
        assert_eq!(
            call.function.as_ref().unwrap().name.as_deref(),
            Some("web__search")
        );

        let finish: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        assert_eq!(
            finish.choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
    }
}
