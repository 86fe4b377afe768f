//! Chat provider implementations
//!
//! Concrete [`ChatProvider`](crate::ChatProvider) backends. Both speak
//! SSE streaming over HTTP and share the rate limiting and error mapping
//! conventions below.

use switchboard_core::LlmError;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> LlmError {
    LlmError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    }
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn stream_closed(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::StreamClosed {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0) as i64)
}
