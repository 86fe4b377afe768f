//! Health Check Endpoints
//!
//! Kubernetes-compatible health checks:
//! - /health - Overall readiness summary
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//!
//! No authentication required for health endpoints. The service stays up
//! without model provider credentials, so missing providers reports as
//! degraded rather than unhealthy.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub providers: Vec<String>,
    pub version: String,
    pub uptime_seconds: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health - Readiness summary
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<String> = state
        .engine
        .provider_names()
        .into_iter()
        .map(String::from)
        .collect();

    let (status, message) = if providers.is_empty() {
        (
            HealthStatus::Degraded,
            Some("no model providers configured".to_string()),
        )
    } else {
        (HealthStatus::Healthy, None)
    };

    let response = HealthResponse {
        status,
        message,
        details: Some(HealthDetails {
            providers,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
        }),
    };

    // Degraded still serves turns, so it reports 200
    (StatusCode::OK, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router (no auth required)
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(readiness))
        .route("/health/ping", get(ping))
        .route("/health/live", get(liveness))
        .with_state(state)
}
