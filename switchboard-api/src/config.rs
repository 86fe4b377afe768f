//! API Configuration Module
//!
//! Configuration for CORS, rate limiting, and other production-level API
//! settings. Loaded from environment variables with sensible defaults for
//! development.

use std::time::Duration;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, rate limiting, and production hardening.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    /// Whether rate limiting is enabled.
    pub rate_limit_enabled: bool,

    /// Rate limit for unauthenticated requests (per IP, per minute).
    pub rate_limit_unauthenticated: u32,

    /// Rate limit for authenticated requests (per bearer token, per minute).
    pub rate_limit_authenticated: u32,

    /// Burst capacity beyond the steady rate.
    pub rate_limit_burst: u32,

    /// Window size for rate limiting.
    pub rate_limit_window: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            // CORS defaults: permissive for development
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,

            // Rate limiting defaults: enabled with reasonable limits
            rate_limit_enabled: true,
            rate_limit_unauthenticated: 60,
            rate_limit_authenticated: 600,
            rate_limit_burst: 10,
            rate_limit_window: Duration::from_secs(60),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SWITCHBOARD_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `SWITCHBOARD_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `SWITCHBOARD_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `SWITCHBOARD_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `SWITCHBOARD_RATE_LIMIT_UNAUTHENTICATED`: Requests per minute per IP (default: 60)
    /// - `SWITCHBOARD_RATE_LIMIT_AUTHENTICATED`: Requests per minute per token (default: 600)
    /// - `SWITCHBOARD_RATE_LIMIT_BURST`: Burst capacity (default: 10)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("SWITCHBOARD_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("SWITCHBOARD_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("SWITCHBOARD_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86400);

        let rate_limit_enabled = std::env::var("SWITCHBOARD_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limit_unauthenticated = std::env::var("SWITCHBOARD_RATE_LIMIT_UNAUTHENTICATED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let rate_limit_authenticated = std::env::var("SWITCHBOARD_RATE_LIMIT_AUTHENTICATED")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(600);

        let rate_limit_burst = std::env::var("SWITCHBOARD_RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            rate_limit_enabled,
            rate_limit_unauthenticated,
            rate_limit_authenticated,
            rate_limit_burst,
            rate_limit_window: Duration::from_secs(60),
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            // Dev mode: allow all
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Support wildcard subdomains: *.switchboard.run
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(pattern)
                        || origin_domain == pattern.strip_prefix('.').unwrap_or(pattern);
                }
            }
            false
        })
    }
}
