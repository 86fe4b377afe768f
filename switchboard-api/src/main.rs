//! Switchboard API Server Entry Point
//!
//! Bootstraps telemetry and configuration, assembles the turn engine
//! from the environment, and starts the Axum HTTP server.

use std::net::SocketAddr;

use axum::Router;
use switchboard_api::telemetry::init_telemetry;
use switchboard_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_telemetry()?;

    let api_config = ApiConfig::from_env();
    let state = AppState::from_env(api_config)?;
    let app: Router = create_api_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Switchboard API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("SWITCHBOARD_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("SWITCHBOARD_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
