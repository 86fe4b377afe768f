//! HTTP Routes Module
//!
//! Route handlers for the Switchboard API:
//! - Turn streaming endpoint (SSE)
//! - Health check endpoints (Kubernetes-compatible)
//! - CORS support for browser-based clients

pub mod health;
pub mod turn;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::middleware::{rate_limit_middleware, RateLimitState};
use crate::state::AppState;

/// Assemble the full API router: the turn endpoint behind rate limiting,
/// health checks without it, plus CORS and request tracing.
pub fn create_api_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let rate_limit_state = RateLimitState::new(state.config.clone());

    let turn_routes = turn::create_router(state.clone()).layer(from_fn_with_state(
        rate_limit_state,
        rate_limit_middleware,
    ));

    Router::new()
        .merge(turn_routes)
        .merge(health::create_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any).expose_headers(Any)
    } else {
        // Production mode: only allow configured origins
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        let cors = cors.allow_origin(origins);
        if config.cors_allow_credentials {
            cors.allow_credentials(true)
        } else {
            cors
        }
    }
}
