//! Strategy selection and the agent-to-direct fallback policy.
//!
//! The agent runner always goes first. Failures that mean "this provider
//! or graph cannot do agent turns" are expected and logged at debug; an
//! agent run that produced no content logs at info; anything else is a
//! real error and logs as one. In every fallback case the direct call
//! runs inside the same response, invisible to the caller. Only a direct
//! call failure surfaces.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use switchboard_agents::{standard_graph, AgentRunner, CommandToolExecutor};
use switchboard_command::{CommandCatalog, CommandDispatcher};
use switchboard_core::{
    ConversationMessage, ErrorClass, ExecutionEvent, IntentClassification, LlmError,
    SwitchboardError,
};
use switchboard_llm::{ChatProvider, ChatRequest, ChatStream};

use crate::direct::DirectCallStrategy;

/// Which strategy produced the turn's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    AgentRunner,
    DirectCall,
}

/// Outcome of one strategy execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    pub strategy: StrategyKind,
    pub content_chars: usize,
    pub fell_back: bool,
}

/// Both strategies over one provider and dispatcher.
pub struct TurnStrategies {
    provider: Arc<dyn ChatProvider>,
    dispatcher: Arc<CommandDispatcher>,
    catalog: Arc<CommandCatalog>,
    bearer_token: Option<String>,
    max_turns: u32,
}

impl TurnStrategies {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        dispatcher: Arc<CommandDispatcher>,
        catalog: Arc<CommandCatalog>,
        max_turns: u32,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            catalog,
            bearer_token: None,
            max_turns,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Agent runner first, direct call on fallback.
    pub async fn execute(
        &self,
        classification: &IntentClassification,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        events: &mpsc::Sender<ExecutionEvent>,
    ) -> Result<TurnOutcome, SwitchboardError> {
        match self
            .run_agent(classification, system_prompt, conversation, events)
            .await
        {
            AgentAttempt::Completed(content_chars) => {
                return Ok(TurnOutcome {
                    strategy: StrategyKind::AgentRunner,
                    content_chars,
                    fell_back: false,
                });
            }
            AgentAttempt::FallBack => {}
        }

        let summary = self.direct_strategy().run(system_prompt, conversation, events).await?;
        Ok(TurnOutcome {
            strategy: StrategyKind::DirectCall,
            content_chars: summary.content_chars,
            fell_back: true,
        })
    }

    async fn run_agent(
        &self,
        classification: &IntentClassification,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        events: &mpsc::Sender<ExecutionEvent>,
    ) -> AgentAttempt {
        let graph = match standard_graph(self.catalog.as_ref()) {
            Ok(graph) => graph,
            Err(error) => {
                tracing::debug!(%error, "agent graph unavailable, using direct call");
                return AgentAttempt::FallBack;
            }
        };

        let mut executor = CommandToolExecutor::new(self.dispatcher.clone());
        if let Some(token) = &self.bearer_token {
            executor = executor.with_bearer_token(token.clone());
        }
        let runner = AgentRunner::new(graph, self.provider.clone(), Arc::new(executor))
            .with_max_turns(self.max_turns);

        match runner
            .run(classification, system_prompt, conversation, events)
            .await
        {
            Ok(summary) if summary.content_chars > 0 => {
                AgentAttempt::Completed(summary.content_chars)
            }
            Ok(summary) => {
                tracing::info!(
                    turns_used = summary.turns_used,
                    "agent run produced no content, using direct call"
                );
                AgentAttempt::FallBack
            }
            Err(error) if error.classify() == ErrorClass::CapabilityIncompatibility => {
                tracing::debug!(%error, "provider cannot drive the agent graph, using direct call");
                AgentAttempt::FallBack
            }
            Err(error) => {
                tracing::error!(
                    %error,
                    class = error.classify().as_db_str(),
                    "agent run failed, using direct call"
                );
                AgentAttempt::FallBack
            }
        }
    }

    fn direct_strategy(&self) -> DirectCallStrategy {
        let mut direct = DirectCallStrategy::new(
            self.provider.clone(),
            self.dispatcher.clone(),
            self.catalog.clone(),
        );
        if let Some(token) = &self.bearer_token {
            direct = direct.with_bearer_token(token.clone());
        }
        direct
    }
}

enum AgentAttempt {
    Completed(usize),
    FallBack,
}

// ============================================================================
// CONNECT-BUDGET PROVIDER
// ============================================================================

/// Wraps a provider so that opening the stream has a hard budget. Once the
/// stream is open the budget no longer applies; the turn deadline governs
/// the rest.
pub struct ConnectTimedProvider {
    inner: Arc<dyn ChatProvider>,
    budget: Duration,
}

impl ConnectTimedProvider {
    pub fn new(inner: Arc<dyn ChatProvider>, budget: Duration) -> Self {
        Self { inner, budget }
    }
}

#[async_trait]
impl ChatProvider for ConnectTimedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LlmError> {
        match tokio::time::timeout(self.budget, self.inner.stream_chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::ConnectTimeout {
                provider: self.inner.name().to_string(),
                budget_ms: self.budget.as_millis() as u64,
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::Intent;
    use switchboard_test_utils::{fixtures, text_message, RecordingGateway, ScriptedChatProvider};

    fn strategies(provider: ScriptedChatProvider, gateway: Arc<RecordingGateway>) -> TurnStrategies {
        let catalog = Arc::new(CommandCatalog::builtin());
        let dispatcher = Arc::new(CommandDispatcher::new(catalog.clone(), gateway));
        TurnStrategies::new(Arc::new(provider), dispatcher, catalog, 20)
    }

    async fn collect(
        strategies: &TurnStrategies,
        classification: &IntentClassification,
        conversation: &[ConversationMessage],
    ) -> (TurnOutcome, Vec<ExecutionEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = strategies
            .execute(classification, "You are Switchboard.", conversation, &tx)
            .await
            .unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    #[tokio::test]
    async fn successful_agent_run_does_not_fall_back() {
        // Orchestrator routes web intent straight to the final answer node,
        // which needs exactly one completed model message.
        let provider = ScriptedChatProvider::new("mock")
            .repeating(text_message("Here is your answer."));
        let strategies = strategies(provider, Arc::new(RecordingGateway::new()));
        let classification = fixtures::classification(Intent::Web);
        let conversation = [ConversationMessage::user("hello there")];

        let (outcome, events) = collect(&strategies, &classification, &conversation).await;
        assert_eq!(outcome.strategy, StrategyKind::AgentRunner);
        assert!(!outcome.fell_back);
        assert!(outcome.content_chars > 0);
        assert!(events
            .iter()
            .any(|e| e.content_text() == Some("Here is your answer.")));
    }

    #[tokio::test]
    async fn toolless_provider_falls_back_to_direct_scrape() {
        // Command intent routes into the tool loop, which refuses a
        // provider without tool support; the direct call scrapes instead.
        let provider = ScriptedChatProvider::new("mock")
            .without_tool_support()
            .repeating(text_message("Running it:\n/web search query=cats"));
        let gateway = Arc::new(RecordingGateway::succeeding(serde_json::json!("ok")));
        let strategies = strategies(provider, gateway.clone());
        let classification = fixtures::classification(Intent::Command);
        let conversation = [ConversationMessage::user("/web search query=cats")];

        let (outcome, events) = collect(&strategies, &classification, &conversation).await;
        assert_eq!(outcome.strategy, StrategyKind::DirectCall);
        assert!(outcome.fell_back);
        assert_eq!(gateway.invocations().len(), 1);
        let flagged = events.iter().any(|e| match e {
            ExecutionEvent::ToolCall { arguments, .. } => arguments["extraction"] == "text_scrape",
            _ => false,
        });
        assert!(flagged);
    }

    #[tokio::test]
    async fn empty_agent_output_falls_back_to_direct() {
        // The agent path completes but yields only whitespace; the direct
        // call repeats the request and gets real text.
        let provider = ScriptedChatProvider::new("mock")
            .with_script(text_message("   "))
            .with_script(text_message("Direct answer."));
        let strategies = strategies(provider, Arc::new(RecordingGateway::new()));
        let classification = fixtures::classification(Intent::Web);
        let conversation = [ConversationMessage::user("hi")];

        let (outcome, events) = collect(&strategies, &classification, &conversation).await;
        assert_eq!(outcome.strategy, StrategyKind::DirectCall);
        assert!(outcome.fell_back);
        assert!(events
            .iter()
            .any(|e| e.content_text() == Some("Direct answer.")));
    }

    #[tokio::test]
    async fn direct_call_failure_surfaces() {
        let provider = ScriptedChatProvider::new("mock").failing(LlmError::RequestFailed {
            provider: "mock".to_string(),
            status: 500,
            message: "upstream exploded".to_string(),
        });
        let strategies = strategies(provider, Arc::new(RecordingGateway::new()));
        let classification = fixtures::classification(Intent::Web);
        let conversation = [ConversationMessage::user("hi")];

        let (tx, _rx) = mpsc::channel(64);
        let result = strategies
            .execute(&classification, "prompt", &conversation, &tx)
            .await;
        assert!(matches!(result, Err(SwitchboardError::Llm(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_budget_maps_to_connect_timeout() {
        struct HangingProvider;

        #[async_trait]
        impl ChatProvider for HangingProvider {
            fn name(&self) -> &str {
                "hanging"
            }
            fn supports_tools(&self) -> bool {
                true
            }
            async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, LlmError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("the budget fires first")
            }
        }

        let provider =
            ConnectTimedProvider::new(Arc::new(HangingProvider), Duration::from_secs(60));
        let result = provider
            .stream_chat(ChatRequest::new(vec![]))
            .await;
        match result {
            Err(LlmError::ConnectTimeout {
                provider, budget_ms, ..
            }) => {
                assert_eq!(provider, "hanging");
                assert_eq!(budget_ms, 60_000);
            }
            Err(other) => panic!("expected a connect timeout, got {other:?}"),
            Ok(_) => panic!("expected a connect timeout, got a stream"),
        }
    }
}
