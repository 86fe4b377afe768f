//! Rate Limiting Middleware
//!
//! Enforces per-caller request rates ahead of the turn handler. Callers
//! presenting a bearer token are keyed by that token; anonymous callers
//! are keyed by client IP, honoring proxy headers. Token keys live only
//! in the in-process limiter map and are never logged.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};

use crate::config::ApiConfig;
use crate::error::ApiError;

/// Type alias for the rate limiter we use.
type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Key for rate limiting - either IP address or bearer token.
#[derive(Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Anonymous request - keyed by IP address
    Ip(IpAddr),
    /// Request with a bearer token - keyed by the token
    Token(String),
}

impl std::fmt::Debug for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitKey::Ip(ip) => f.debug_tuple("Ip").field(ip).finish(),
            RateLimitKey::Token(_) => f.debug_tuple("Token").field(&"[REDACTED]").finish(),
        }
    }
}

/// State for rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    /// Per-key rate limiters - uses DashMap for lock-free concurrent access
    limiters: Arc<DashMap<RateLimitKey, Arc<DirectRateLimiter>>>,
}

impl RateLimitState {
    /// Create new rate limit state from API configuration.
    pub fn new(config: Arc<ApiConfig>) -> Self {
        Self {
            config,
            limiters: Arc::new(DashMap::new()),
        }
    }

    /// Get or create a rate limiter for the given key.
    fn get_or_create_limiter(&self, key: &RateLimitKey) -> Arc<DirectRateLimiter> {
        let limiter = self.limiters.entry(key.clone()).or_insert_with(|| {
            let requests_per_minute = match key {
                RateLimitKey::Ip(_) => self.config.rate_limit_unauthenticated,
                RateLimitKey::Token(_) => self.config.rate_limit_authenticated,
            };

            let quota =
                Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN))
                    .allow_burst(
                        NonZeroU32::new(self.config.rate_limit_burst).unwrap_or(NonZeroU32::MIN),
                    );

            Arc::new(RateLimiter::direct(quota))
        });

        limiter.clone()
    }
}

/// Error type for rate limit middleware.
pub struct RateLimitError {
    /// Seconds until the limit resets
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        use axum::http::HeaderValue;

        let error = ApiError::too_many_requests(Some(self.retry_after));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(error)).into_response();
        response.headers_mut().insert(
            axum::http::header::HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );

        response
    }
}

/// Extract client IP from request, considering proxy headers.
fn extract_client_ip(request: &Request, fallback: Option<std::net::SocketAddr>) -> IpAddr {
    // X-Forwarded-For can contain multiple IPs, take the first one
    if let Some(forwarded_for) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse() {
                return ip;
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
    {
        if let Ok(ip) = real_ip.trim().parse() {
            return ip;
        }
    }

    fallback
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Bearer token from the Authorization header, if any.
pub fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Rate limiting middleware.
///
/// When rate limited, returns 429 Too Many Requests with a Retry-After
/// header.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    connect_info: Option<ConnectInfo<std::net::SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    use axum::http::HeaderValue;

    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let key = match bearer_token(&request) {
        Some(token) => RateLimitKey::Token(token),
        None => RateLimitKey::Ip(extract_client_ip(
            &request,
            connect_info.map(|ConnectInfo(addr)| addr),
        )),
    };

    let limiter = state.get_or_create_limiter(&key);

    match limiter.check() {
        Ok(_) => {
            let mut response = next.run(request).await;

            let limit = match &key {
                RateLimitKey::Ip(_) => state.config.rate_limit_unauthenticated,
                RateLimitKey::Token(_) => state.config.rate_limit_authenticated,
            };
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from_str(&limit.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("60")),
            );

            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);

            Err(RateLimitError { retry_after })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
