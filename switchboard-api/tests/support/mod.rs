//! Shared helpers for API endpoint tests.
//!
//! Builds a full router over an in-process engine: scripted provider,
//! recording command gateway, in-memory retrieval and job stores. No
//! network, no credentials.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use switchboard_api::{create_api_router, ApiConfig, AppState};
use switchboard_command::{CommandCatalog, CommandDispatcher};
use switchboard_context::{ContextInjector, InMemoryJobStore, InMemoryRetrievalService, InjectorConfig};
use switchboard_core::EngineConfig;
use switchboard_engine::TurnEngine;
use switchboard_llm::ProviderRegistry;
use switchboard_test_utils::{text_message, RecordingGateway, ScriptedChatProvider};

pub struct TestApp {
    pub router: Router,
    pub provider: Arc<ScriptedChatProvider>,
}

/// Router over an engine whose provider repeats one plain reply.
pub fn test_app() -> TestApp {
    test_app_with_config(ApiConfig::default())
}

pub fn test_app_with_config(api_config: ApiConfig) -> TestApp {
    let provider = Arc::new(
        ScriptedChatProvider::new("scripted").repeating(text_message("Hello from the engine.")),
    );
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    build_app(registry, provider, api_config)
}

/// Router over an engine with no model providers registered.
pub fn test_app_without_providers() -> TestApp {
    let provider = Arc::new(ScriptedChatProvider::new("unregistered"));
    build_app(ProviderRegistry::new(), provider, ApiConfig::default())
}

fn build_app(
    registry: ProviderRegistry,
    provider: Arc<ScriptedChatProvider>,
    api_config: ApiConfig,
) -> TestApp {
    let catalog = Arc::new(CommandCatalog::builtin());
    let gateway = Arc::new(RecordingGateway::succeeding(
        serde_json::json!({"status": "sent"}),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(catalog.clone(), gateway));

    let config = EngineConfig::default();
    let injector = Arc::new(ContextInjector::new(
        Arc::new(InMemoryRetrievalService::new()),
        Arc::new(InMemoryJobStore::new()),
        InjectorConfig::from(&config),
    ));

    let engine = Arc::new(TurnEngine::new(
        Arc::new(registry),
        dispatcher,
        catalog,
        injector,
        config,
    ));

    let router = create_api_router(AppState::new(engine, api_config));

    TestApp { router, provider }
}

/// POST the given JSON body to /api/v1/turn, with optional bearer token.
pub async fn post_turn(router: &Router, body: Value, bearer: Option<&str>) -> Response {
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/v1/turn")
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {}", token));
    }

    router
        .clone()
        .oneshot(
            request
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse the JSON payloads out of an SSE body, in order.
pub fn sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str(payload).ok())
        .collect()
}

pub fn turn_body(text: &str) -> Value {
    serde_json::json!({
        "messages": [{"role": "user", "content": text}]
    })
}
