//! OpenAI streaming chat provider with rate limiting

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_core::LlmError;
use tokio::sync::Semaphore;

use super::types::{to_wire, ApiError, StreamChunk};
use crate::providers::{parse_retry_after_ms, rate_limited, request_failed, stream_closed};
use crate::sse::SseDecoder;
use crate::{ChatProvider, ChatRequest, ChatStream, ChatStreamEvent, StopReason};

const PROVIDER: &str = "openai";

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    tool_support: bool,
    rate_limiter: Arc<Semaphore>,
    last_request: Arc<AtomicU64>,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl OpenAiProvider {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `requests_per_minute` - Maximum requests per minute
    /// * `connect_timeout` - TCP/TLS connect budget for the HTTP client
    pub fn new(
        api_key: impl Into<String>,
        requests_per_minute: u32,
        connect_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let rpm = requests_per_minute.max(1);
        let min_interval_ms = (60_000 / rpm as u64).max(10);
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| request_failed(PROVIDER, 0, format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            tool_support: true,
            rate_limiter: Arc::new(Semaphore::new(rpm as usize)),
            last_request: Arc::new(AtomicU64::new(0)),
            min_request_interval_ms: min_interval_ms,
            start_time: Instant::now(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_tool_support(mut self, enabled: bool) -> Self {
        self.tool_support = enabled;
        self
    }

    async fn pace(&self) {
        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);
        if elapsed < self.min_request_interval_ms {
            tokio::time::sleep(Duration::from_millis(self.min_request_interval_ms - elapsed))
                .await;
        }
        self.last_request.store(now_ms, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supports_tools(&self) -> bool {
        self.tool_support
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let permit = self
            .rate_limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("Rate limiter error: {e}")))?;
        self.pace().await;

        let body = to_wire(&request, &self.model);
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => rate_limited(PROVIDER, retry_after_ms),
                _ => request_failed(PROVIDER, status.as_u16(), message),
            });
        }

        let mut body_stream = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let _permit = permit;
            let mut decoder = SseDecoder::new();
            let mut state = CallState::default();
            let mut completed = false;

            'read: while let Some(chunk) = body_stream.next().await {
                let chunk = chunk
                    .map_err(|e| stream_closed(PROVIDER, format!("body stream error: {e}")))?;
                for frame in decoder.push(&chunk) {
                    let data = frame.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        if !completed {
                            Err(stream_closed(PROVIDER, "[DONE] before finish_reason"))?;
                        }
                        break 'read;
                    }
                    let parsed: StreamChunk = match serde_json::from_str(data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping undecodable stream chunk");
                            continue;
                        }
                    };
                    for mapped in map_chunk(parsed, &mut state) {
                        if matches!(mapped, ChatStreamEvent::MessageCompleted { .. }) {
                            completed = true;
                        }
                        yield mapped;
                    }
                }
            }

            if !completed {
                Err(stream_closed(PROVIDER, "stream ended before finish_reason"))?;
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Per-stream mapping state: tool call ids by wire index.
#[derive(Debug, Default)]
struct CallState {
    call_ids: HashMap<usize, String>,
}

fn map_chunk(chunk: StreamChunk, state: &mut CallState) -> Vec<ChatStreamEvent> {
    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(ChatStreamEvent::TextDelta(content));
            }
        }
        for call in choice.delta.tool_calls {
            if let Some(id) = call.id {
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                state.call_ids.insert(call.index, id.clone());
                events.push(ChatStreamEvent::ToolCallStarted { id, name });
            }
            let fragment = call.function.and_then(|f| f.arguments).unwrap_or_default();
            if !fragment.is_empty() {
                if let Some(id) = state.call_ids.get(&call.index) {
                    events.push(ChatStreamEvent::ToolCallDelta {
                        id: id.clone(),
                        arguments_fragment: fragment,
                    });
                }
            }
        }
        if let Some(reason) = choice.finish_reason {
            events.push(ChatStreamEvent::MessageCompleted {
                stop_reason: StopReason::from_wire(&reason),
            });
        }
    }
    events
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(json: &str) -> StreamChunk {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn maps_content_deltas() {
        let mut state = CallState::default();
        let events = map_chunk(
            chunk(r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#),
            &mut state,
        );
        assert_eq!(events, vec![ChatStreamEvent::TextDelta("Hello".to_string())]);
    }

    #[test]
    fn first_tool_fragment_opens_call_and_carries_arguments() {
        let mut state = CallState::default();
        let events = map_chunk(
            chunk(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_3","function":{"name":"web__search","arguments":"{\"qu"}}]},"finish_reason":null}]}"#,
            ),
            &mut state,
        );
        assert_eq!(
            events,
            vec![
                ChatStreamEvent::ToolCallStarted {
                    id: "call_3".to_string(),
                    name: "web__search".to_string(),
                },
                ChatStreamEvent::ToolCallDelta {
                    id: "call_3".to_string(),
                    arguments_fragment: "{\"qu".to_string(),
                },
            ]
        );

        // Later fragments carry only the index.
        let events = map_chunk(
            chunk(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ery\":\"x\"}"}}]},"finish_reason":null}]}"#,
            ),
            &mut state,
        );
        assert_eq!(
            events,
            vec![ChatStreamEvent::ToolCallDelta {
                id: "call_3".to_string(),
                arguments_fragment: "ery\":\"x\"}".to_string(),
            }]
        );
    }

    #[test]
    fn finish_reason_completes_the_message() {
        let mut state = CallState::default();
        let events = map_chunk(
            chunk(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            &mut state,
        );
        assert_eq!(
            events,
            vec![ChatStreamEvent::MessageCompleted {
                stop_reason: StopReason::ToolUse
            }]
        );
    }

    #[test]
    fn fragments_for_unknown_index_are_dropped() {
        let mut state = CallState::default();
        let events = map_chunk(
            chunk(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":5,"function":{"arguments":"orphan"}}]},"finish_reason":null}]}"#,
            ),
            &mut state,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn debug_redacts_api_key() {
        let provider = OpenAiProvider::new("sk-secret", 60, Duration::from_secs(60)).unwrap();
        let rendered = format!("{provider:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sk-secret"));
    }
}
