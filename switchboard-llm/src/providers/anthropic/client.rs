//! Anthropic streaming chat provider with rate limiting

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_core::LlmError;
use tokio::sync::Semaphore;

use super::types::{
    to_wire, ApiError, ContentDelta, MessageDeltaBody, StartBlock, StreamEvent,
};
use crate::providers::{parse_retry_after_ms, rate_limited, request_failed, stream_closed};
use crate::sse::SseDecoder;
use crate::{ChatProvider, ChatRequest, ChatStream, ChatStreamEvent, StopReason};

const PROVIDER: &str = "anthropic";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
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

impl AnthropicProvider {
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-20250514";

    /// Create a new Anthropic provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
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
            base_url: "https://api.anthropic.com/v1".to_string(),
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

    /// Disable tool definitions for this provider, forcing callers onto
    /// the plain-chat path.
    pub fn with_tool_support(mut self, enabled: bool) -> Self {
        self.tool_support = enabled;
        self
    }

    /// Enforce the minimum interval between request starts.
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
impl ChatProvider for AnthropicProvider {
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
        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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
            // Permit held for the lifetime of the stream.
            let _permit = permit;
            let mut decoder = SseDecoder::new();
            let mut state = BlockState::default();
            let mut completed = false;

            'read: while let Some(chunk) = body_stream.next().await {
                let chunk = chunk
                    .map_err(|e| stream_closed(PROVIDER, format!("body stream error: {e}")))?;
                for frame in decoder.push(&chunk) {
                    if frame.data.is_empty() {
                        continue;
                    }
                    let event: StreamEvent = match serde_json::from_str(&frame.data) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping undecodable stream frame");
                            continue;
                        }
                    };
                    for mapped in map_event(event, &mut state)? {
                        if matches!(mapped, ChatStreamEvent::MessageCompleted { .. }) {
                            completed = true;
                        }
                        yield mapped;
                    }
                    if completed {
                        break 'read;
                    }
                }
            }

            if !completed {
                Err(stream_closed(PROVIDER, "stream ended before message_stop"))?;
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Per-stream mapping state: open tool-use blocks by index, plus the stop
/// reason announced by `message_delta` ahead of `message_stop`.
#[derive(Debug, Default)]
struct BlockState {
    tool_blocks: HashMap<usize, String>,
    stop_reason: Option<StopReason>,
}

fn map_event(
    event: StreamEvent,
    state: &mut BlockState,
) -> Result<Vec<ChatStreamEvent>, LlmError> {
    match event {
        StreamEvent::MessageStart { .. }
        | StreamEvent::Ping
        | StreamEvent::ContentBlockStop { .. }
        | StreamEvent::Unknown => Ok(Vec::new()),
        StreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            StartBlock::Text { text } if !text.is_empty() => {
                Ok(vec![ChatStreamEvent::TextDelta(text)])
            }
            StartBlock::Text { .. } | StartBlock::Unknown => Ok(Vec::new()),
            StartBlock::ToolUse { id, name } => {
                state.tool_blocks.insert(index, id.clone());
                Ok(vec![ChatStreamEvent::ToolCallStarted { id, name }])
            }
        },
        StreamEvent::ContentBlockDelta { index, delta } => match delta {
            ContentDelta::TextDelta { text } => Ok(vec![ChatStreamEvent::TextDelta(text)]),
            ContentDelta::InputJsonDelta { partial_json } => {
                Ok(match state.tool_blocks.get(&index) {
                    Some(id) => vec![ChatStreamEvent::ToolCallDelta {
                        id: id.clone(),
                        arguments_fragment: partial_json,
                    }],
                    None => Vec::new(),
                })
            }
            ContentDelta::Unknown => Ok(Vec::new()),
        },
        StreamEvent::MessageDelta {
            delta: MessageDeltaBody { stop_reason },
        } => {
            if let Some(reason) = stop_reason {
                state.stop_reason = Some(StopReason::from_wire(&reason));
            }
            Ok(Vec::new())
        }
        StreamEvent::MessageStop => Ok(vec![ChatStreamEvent::MessageCompleted {
            stop_reason: state.stop_reason.unwrap_or(StopReason::EndTurn),
        }]),
        StreamEvent::Error { error } => Err(request_failed(
            PROVIDER,
            0,
            format!("{}: {}", error.error_type, error.message),
        )),
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
