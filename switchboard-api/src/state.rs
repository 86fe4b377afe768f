//! Application State
//!
//! Builds the turn engine and its collaborators from the environment and
//! shares them across handlers. Every collaborator has an in-process
//! fallback so the server always starts: no provider keys means turns
//! degrade to the apology path, no executor URL means the local command
//! gateway, no retrieval or job URLs mean the in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use switchboard_command::{
    CommandCatalog, CommandDispatcher, CommandGateway, HttpCommandGateway, LocalCommandGateway,
};
use switchboard_context::{
    ContextInjector, HttpJobStore, HttpRetrievalService, InMemoryJobStore,
    InMemoryRetrievalService, InjectorConfig, JobStore, RetrievalService,
};
use switchboard_core::EngineConfig;
use switchboard_engine::TurnEngine;
use switchboard_llm::{AnthropicProvider, OpenAiProvider, ProviderRegistry};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TurnEngine>,
    pub config: Arc<ApiConfig>,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Arc<TurnEngine>, config: ApiConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            started_at: std::time::Instant::now(),
        }
    }

    /// Assemble the engine from environment variables.
    ///
    /// Environment variables:
    /// - `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`, `SWITCHBOARD_ANTHROPIC_MODEL`
    /// - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `SWITCHBOARD_OPENAI_MODEL`
    /// - `SWITCHBOARD_DEFAULT_PROVIDER`: "anthropic" or "openai"
    /// - `SWITCHBOARD_PROVIDER_RPM`: provider request pacing (default: 60)
    /// - `SWITCHBOARD_COMMAND_GATEWAY_URL`: HTTP command executor (default: local)
    /// - `SWITCHBOARD_RETRIEVAL_URL`: HTTP retrieval collaborator (default: in-memory)
    /// - `SWITCHBOARD_JOBS_URL`: HTTP job store (default: in-memory)
    /// - `SWITCHBOARD_VECTOR_SEARCH`: enable vector retrieval mode (default: false)
    /// - plus the `SWITCHBOARD_*` engine timeouts read by `EngineConfig::from_env`
    pub fn from_env(api_config: ApiConfig) -> ApiResult<Self> {
        let engine_config = EngineConfig::from_env();
        engine_config
            .validate()
            .map_err(|e| ApiError::invalid_input(format!("Invalid engine config: {}", e)))?;

        let registry = build_registry(&engine_config)?;
        let catalog = Arc::new(CommandCatalog::builtin());
        let gateway = build_gateway(&engine_config)?;
        let dispatcher = Arc::new(CommandDispatcher::new(catalog.clone(), gateway));
        let injector = build_injector(&engine_config)?;

        let engine = Arc::new(TurnEngine::new(
            Arc::new(registry),
            dispatcher,
            catalog,
            injector,
            engine_config,
        ));

        Ok(Self::new(engine, api_config))
    }
}

fn build_registry(config: &EngineConfig) -> ApiResult<ProviderRegistry> {
    let rpm = env_u32("SWITCHBOARD_PROVIDER_RPM").unwrap_or(60);
    let connect_timeout = config.provider_connect_timeout;
    let mut registry = ProviderRegistry::new();

    if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
        let mut provider = AnthropicProvider::new(api_key, rpm, connect_timeout)
            .map_err(|e| ApiError::internal_error(format!("Anthropic provider: {}", e)))?;
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            provider = provider.with_base_url(base_url);
        }
        if let Ok(model) = std::env::var("SWITCHBOARD_ANTHROPIC_MODEL") {
            provider = provider.with_model(model);
        }
        registry.register(Arc::new(provider));
    }

    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        let mut provider = OpenAiProvider::new(api_key, rpm, connect_timeout)
            .map_err(|e| ApiError::internal_error(format!("OpenAI provider: {}", e)))?;
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            provider = provider.with_base_url(base_url);
        }
        if let Ok(model) = std::env::var("SWITCHBOARD_OPENAI_MODEL") {
            provider = provider.with_model(model);
        }
        registry.register(Arc::new(provider));
    }

    if let Ok(name) = std::env::var("SWITCHBOARD_DEFAULT_PROVIDER") {
        registry
            .set_default(&name)
            .map_err(|e| ApiError::invalid_input(format!("Default provider: {}", e)))?;
    }

    if registry.is_empty() {
        // Turns still work; the engine answers with the credentials apology.
        tracing::warn!("no provider API keys configured");
    } else {
        tracing::info!(providers = ?registry.names(), "model providers configured");
    }

    Ok(registry)
}

fn build_gateway(config: &EngineConfig) -> ApiResult<Arc<dyn CommandGateway>> {
    match std::env::var("SWITCHBOARD_COMMAND_GATEWAY_URL") {
        Ok(url) => {
            let gateway = HttpCommandGateway::new(url, config.command_timeout)
                .map_err(|e| ApiError::internal_error(format!("Command gateway: {}", e)))?;
            Ok(Arc::new(gateway))
        }
        Err(_) => {
            tracing::info!("no command executor URL, using the local gateway");
            Ok(Arc::new(LocalCommandGateway::new()))
        }
    }
}

fn build_injector(config: &EngineConfig) -> ApiResult<Arc<ContextInjector>> {
    let vector_search = std::env::var("SWITCHBOARD_VECTOR_SEARCH")
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);

    let retrieval: Arc<dyn RetrievalService> = match std::env::var("SWITCHBOARD_RETRIEVAL_URL") {
        Ok(url) => {
            let mut service = HttpRetrievalService::new(url, connect_budget(config))
                .map_err(|e| ApiError::internal_error(format!("Retrieval service: {}", e)))?
                .with_vector_search(vector_search);
            if let Ok(token) = std::env::var("SWITCHBOARD_RETRIEVAL_TOKEN") {
                service = service.with_auth_token(token);
            }
            Arc::new(service)
        }
        Err(_) => Arc::new(InMemoryRetrievalService::new().with_vector_search(vector_search)),
    };

    let jobs: Arc<dyn JobStore> = match std::env::var("SWITCHBOARD_JOBS_URL") {
        Ok(url) => {
            let mut store = HttpJobStore::new(url, connect_budget(config))
                .map_err(|e| ApiError::internal_error(format!("Job store: {}", e)))?;
            if let Ok(token) = std::env::var("SWITCHBOARD_RETRIEVAL_TOKEN") {
                store = store.with_auth_token(token);
            }
            Arc::new(store)
        }
        Err(_) => Arc::new(InMemoryJobStore::new()),
    };

    Ok(Arc::new(ContextInjector::new(
        retrieval,
        jobs,
        InjectorConfig::from(config),
    )))
}

/// Connect budget for collaborator HTTP clients; the per-call timeout is
/// enforced by the injector.
fn connect_budget(config: &EngineConfig) -> Duration {
    config.retrieval_timeout.min(Duration::from_secs(10))
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
