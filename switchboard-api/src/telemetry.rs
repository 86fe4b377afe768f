//! Tracing Subscriber Initialization
//!
//! Structured JSON logs with an env-filter. The default filter keeps the
//! API and tower-http at debug while everything else stays at info;
//! override with `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Initialize the tracing subscriber. Call once at startup.
pub fn init_telemetry() -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("switchboard_api=debug,tower_http=debug,info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = env!("CARGO_PKG_NAME"),
        service_version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );

    Ok(())
}
