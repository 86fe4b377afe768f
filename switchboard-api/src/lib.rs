//! Switchboard API Server
//!
//! HTTP surface for the turn engine. One streaming endpoint runs a
//! conversational turn over Server-Sent Events; health checks and
//! per-caller rate limiting round out the production layer. All turn
//! semantics live in `switchboard-engine`; this crate only adapts them
//! to HTTP.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
