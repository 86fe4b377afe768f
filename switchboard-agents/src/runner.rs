//! Multi-turn agent runner.
//!
//! Walks the handoff graph one node activation at a time. The entry node
//! routes by the decision table and the discovery node resolves the
//! catalog in-process, so only the tool-loop and synthesis nodes ever call
//! the model provider. Every activation, routing hops included, costs one
//! turn against the budget; a cycling graph or a tool-happy model
//! terminates with a structured error instead of spinning.
//!
//! Events go out on an mpsc channel as they happen: tool calls and
//! results, handoff system records, one content record per completed
//! model message, and a final aggregate. The downstream normalizer owns
//! deduplication, so the content/aggregate pair for the same text is
//! intentional here.

use futures_util::StreamExt;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use switchboard_core::message::latest_user_message;
use switchboard_core::{
    AgentError, ConversationMessage, ErrorClass, ExecutionEvent, IntentClassification,
    MessageRole, SwitchboardError,
};
use switchboard_llm::{
    ChatCompletion, ChatMessage, ChatProvider, ChatRequest, StreamCollector, ToolSpec,
};
use tokio::sync::mpsc;

use crate::executor::ToolExecutor;
use crate::graph::{route_turn, wants_execution, AgentGraph, AgentNode, HandoffEdge, InputFilter, RoutingPolicy};

/// Handoff budget per request.
pub const DEFAULT_MAX_TURNS: u32 = 20;

/// What one completed run produced, for the strategy selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Node activations consumed, routing hops included.
    pub turns_used: u32,
    /// Characters of answer text put on the content channel.
    pub content_chars: usize,
    /// Node that produced the final output.
    pub final_agent: String,
}

/// Drives an [`AgentGraph`] for one request.
pub struct AgentRunner {
    graph: AgentGraph,
    provider: Arc<dyn ChatProvider>,
    executor: Arc<dyn ToolExecutor>,
    max_turns: u32,
}

impl AgentRunner {
    pub fn new(
        graph: AgentGraph,
        provider: Arc<dyn ChatProvider>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            graph,
            provider,
            executor,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn graph(&self) -> &AgentGraph {
        &self.graph
    }

    /// Run one turn of the conversation to completion, emitting events as
    /// they happen.
    pub async fn run(
        &self,
        classification: &IntentClassification,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        events: &mpsc::Sender<ExecutionEvent>,
    ) -> Result<RunSummary, SwitchboardError> {
        let query = latest_user_message(conversation)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let mut transcript: Vec<ChatMessage> = conversation.iter().map(chat_message).collect();
        let mut current = self.graph.entry_node();
        let mut turns_used: u32 = 0;
        let mut content_chars: usize = 0;

        loop {
            if turns_used >= self.max_turns {
                return Err(AgentError::TurnBudgetExhausted {
                    limit: self.max_turns,
                }
                .into());
            }
            turns_used += 1;
            tracing::debug!(
                agent = %current.name,
                turn = turns_used,
                policy = ?current.routing_policy,
                "agent activation"
            );

            match current.routing_policy {
                RoutingPolicy::DecisionTable => {
                    let decision = route_turn(classification, &query);
                    tracing::debug!(
                        target = decision.target,
                        reason = decision.reason,
                        "routing decision"
                    );
                    let edge = current
                        .handoff_to(decision.target)
                        .cloned()
                        .ok_or_else(|| AgentError::GraphConstruction {
                            reason: format!(
                                "no handoff from '{}' to '{}'",
                                current.name, decision.target
                            ),
                        })?;
                    let (next, filtered) = self
                        .hand_off(&current.name, &edge, decision.reason, transcript, events)
                        .await?;
                    current = next;
                    transcript = filtered;
                }

                RoutingPolicy::CatalogLookup => {
                    let tool = current
                        .tools
                        .first()
                        .map(|t| t.name.clone())
                        .unwrap_or_else(|| crate::executor::LOOKUP_COMMAND_TOOL.to_string());
                    let arguments = json!({ "query": query });
                    emit(
                        events,
                        ExecutionEvent::tool_call(
                            Some(current.name.clone()),
                            tool.clone(),
                            None,
                            arguments.clone(),
                        ),
                    )
                    .await?;
                    let output = self.executor.execute(&tool, &arguments).await?;
                    emit(
                        events,
                        ExecutionEvent::tool_result(
                            Some(current.name.clone()),
                            tool,
                            None,
                            output.result.clone(),
                        ),
                    )
                    .await?;
                    let reference = output
                        .result
                        .get("reference")
                        .and_then(Value::as_str)
                        .unwrap_or("No matching commands found.")
                        .to_string();

                    if wants_execution(&query) {
                        transcript.push(ChatMessage::assistant(reference.as_str()));
                        let edge = current.handoffs.first().cloned().ok_or_else(|| {
                            AgentError::GraphConstruction {
                                reason: format!("discovery node '{}' has no handoff", current.name),
                            }
                        })?;
                        let (next, filtered) = self
                            .hand_off(
                                &current.name,
                                &edge,
                                "execution_requested",
                                transcript,
                                events,
                            )
                            .await?;
                        current = next;
                        transcript = filtered;
                    } else {
                        emit(
                            events,
                            ExecutionEvent::content(Some(current.name.clone()), reference.clone()),
                        )
                        .await?;
                        content_chars += reference.chars().count();
                        emit(
                            events,
                            ExecutionEvent::final_output(Some(current.name.clone()), reference),
                        )
                        .await?;
                        return Ok(RunSummary {
                            turns_used,
                            content_chars,
                            final_agent: current.name.clone(),
                        });
                    }
                }

                RoutingPolicy::ToolLoop => {
                    if !self.provider.supports_tools() {
                        let tool = current
                            .tools
                            .first()
                            .map(|t| t.name.clone())
                            .or_else(|| current.handoffs.first().map(|e| e.name.clone()))
                            .unwrap_or_else(|| "function_calling".to_string());
                        return Err(AgentError::UnsupportedCapability { tool }.into());
                    }
                    let request =
                        ChatRequest::new(self.node_messages(current, system_prompt, &transcript))
                            .with_tools(node_tool_specs(current));
                    let completion = self.complete(request).await?;

                    if !completion.text.trim().is_empty() {
                        emit(
                            events,
                            ExecutionEvent::content(
                                Some(current.name.clone()),
                                completion.text.clone(),
                            ),
                        )
                        .await?;
                        content_chars += completion.text.chars().count();
                    }
                    transcript.push(ChatMessage::assistant_with_tools(
                        completion.text.clone(),
                        completion.tool_calls.clone(),
                    ));

                    if completion.tool_calls.is_empty() {
                        if !completion.text.trim().is_empty() {
                            emit(
                                events,
                                ExecutionEvent::final_output(
                                    Some(current.name.clone()),
                                    completion.text.clone(),
                                ),
                            )
                            .await?;
                            return Ok(RunSummary {
                                turns_used,
                                content_chars,
                                final_agent: current.name.clone(),
                            });
                        }
                        // Nothing produced; walk on if the node can.
                        match current.handoffs.first().cloned() {
                            Some(edge) => {
                                let (next, filtered) = self
                                    .hand_off(
                                        &current.name,
                                        &edge,
                                        "no_tool_calls",
                                        transcript,
                                        events,
                                    )
                                    .await?;
                                current = next;
                                transcript = filtered;
                            }
                            None => {
                                return Ok(RunSummary {
                                    turns_used,
                                    content_chars,
                                    final_agent: current.name.clone(),
                                });
                            }
                        }
                        continue;
                    }

                    let mut answered: Vec<String> = Vec::new();
                    let mut requested: Option<(HandoffEdge, String)> = None;
                    for (index, call) in completion.tool_calls.iter().enumerate() {
                        if let Some(edge) = current.handoff_named(&call.name) {
                            if index + 1 < completion.tool_calls.len() {
                                tracing::debug!(
                                    dropped = completion.tool_calls.len() - index - 1,
                                    "tool calls after a handoff are not executed"
                                );
                            }
                            requested = Some((edge.clone(), call.id.clone()));
                            break;
                        }

                        let command = self.executor.render_command(&call.name, &call.arguments);
                        emit(
                            events,
                            ExecutionEvent::tool_call(
                                Some(current.name.clone()),
                                call.name.clone(),
                                command.clone(),
                                call.arguments.clone(),
                            ),
                        )
                        .await?;
                        match self.executor.execute(&call.name, &call.arguments).await {
                            Ok(output) => {
                                if let Some(class) = output.error_class {
                                    emit(
                                        events,
                                        ExecutionEvent::error(class, summary_text(&output.result)),
                                    )
                                    .await?;
                                }
                                let rendered = output.command.clone().or(command);
                                emit(
                                    events,
                                    ExecutionEvent::tool_result(
                                        Some(current.name.clone()),
                                        call.name.clone(),
                                        rendered,
                                        output.result.clone(),
                                    ),
                                )
                                .await?;
                                transcript.push(ChatMessage::tool_result(
                                    call.id.clone(),
                                    summary_text(&output.result),
                                ));
                                answered.push(call.id.clone());
                            }
                            Err(AgentError::ToolFailed { tool, message }) => {
                                tracing::warn!(tool = %tool, error = %message, "tool call failed");
                                emit(
                                    events,
                                    ExecutionEvent::error(
                                        ErrorClass::CommandExecution,
                                        message.clone(),
                                    ),
                                )
                                .await?;
                                transcript.push(ChatMessage::tool_result(
                                    call.id.clone(),
                                    format!("Tool '{tool}' failed: {message}"),
                                ));
                                answered.push(call.id.clone());
                            }
                            Err(other) => return Err(other.into()),
                        }
                    }

                    if let Some((edge, transfer_id)) = requested {
                        // Every opened call gets a result before the
                        // transcript moves on, including skipped ones.
                        for call in &completion.tool_calls {
                            if call.id != transfer_id && !answered.contains(&call.id) {
                                transcript.push(ChatMessage::tool_result(
                                    call.id.clone(),
                                    format!("Skipped: control moved to {}.", edge.target_agent),
                                ));
                            }
                        }
                        transcript.push(ChatMessage::tool_result(
                            transfer_id,
                            format!("Transferring to {}.", edge.target_agent),
                        ));
                        let (next, filtered) = self
                            .hand_off(&current.name, &edge, "model_requested", transcript, events)
                            .await?;
                        current = next;
                        transcript = filtered;
                    }
                    // Otherwise stay on this node for another round.
                }

                RoutingPolicy::Synthesize => {
                    let request =
                        ChatRequest::new(self.node_messages(current, system_prompt, &transcript));
                    let completion = self.complete(request).await?;
                    if !completion.text.trim().is_empty() {
                        emit(
                            events,
                            ExecutionEvent::content(
                                Some(current.name.clone()),
                                completion.text.clone(),
                            ),
                        )
                        .await?;
                        content_chars += completion.text.chars().count();
                        emit(
                            events,
                            ExecutionEvent::final_output(
                                Some(current.name.clone()),
                                completion.text.clone(),
                            ),
                        )
                        .await?;
                    }
                    return Ok(RunSummary {
                        turns_used,
                        content_chars,
                        final_agent: current.name.clone(),
                    });
                }
            }
        }
    }

    /// Emit the handoff record, then produce the target node and the
    /// filtered transcript it receives.
    async fn hand_off<'a>(
        &'a self,
        from: &str,
        edge: &HandoffEdge,
        reason: &str,
        transcript: Vec<ChatMessage>,
        events: &mpsc::Sender<ExecutionEvent>,
    ) -> Result<(&'a AgentNode, Vec<ChatMessage>), SwitchboardError> {
        emit(
            events,
            ExecutionEvent::system(
                format!("{} handing off to {}", from, edge.target_agent),
                Some(json!({
                    "from": from,
                    "to": edge.target_agent,
                    "reason": reason,
                })),
            ),
        )
        .await?;
        let next = self
            .graph
            .node(&edge.target_agent)
            .ok_or_else(|| AgentError::UnknownNode {
                name: edge.target_agent.clone(),
            })?;
        Ok((next, apply_input_filter(edge.input_filter, transcript)))
    }

    /// One full provider exchange, collected into a single message.
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, SwitchboardError> {
        let mut stream = self
            .provider
            .stream_chat(request)
            .await
            .map_err(SwitchboardError::from)?;
        let mut collector = StreamCollector::new();
        while let Some(event) = stream.next().await {
            collector.absorb(&event?);
        }
        Ok(collector.finish())
    }

    fn node_messages(
        &self,
        node: &AgentNode,
        system_prompt: &str,
        transcript: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        let system = match (
            system_prompt.trim().is_empty(),
            node.instructions.trim().is_empty(),
        ) {
            (false, false) => format!("{}\n\n{}", system_prompt, node.instructions),
            (false, true) => system_prompt.to_string(),
            (true, false) => node.instructions.clone(),
            (true, true) => String::new(),
        };
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(transcript.iter().cloned());
        messages
    }
}

impl fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRunner")
            .field("entry", &self.graph.entry_node().name)
            .field("provider", &self.provider.name())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

fn chat_message(message: &ConversationMessage) -> ChatMessage {
    match message.role {
        MessageRole::User => ChatMessage::user(message.content.as_str()),
        MessageRole::Assistant => ChatMessage::assistant(message.content.as_str()),
    }
}

fn node_tool_specs(node: &AgentNode) -> Vec<ToolSpec> {
    let mut specs: Vec<ToolSpec> = node.tools.iter().map(|t| t.to_spec()).collect();
    specs.extend(node.handoffs.iter().map(|e| e.to_spec()));
    specs
}

fn apply_input_filter(filter: InputFilter, transcript: Vec<ChatMessage>) -> Vec<ChatMessage> {
    match filter {
        InputFilter::All => transcript,
        InputFilter::ContentOnly => transcript
            .into_iter()
            .filter_map(|message| match message {
                ChatMessage::Assistant { content, .. } => {
                    if content.trim().is_empty() {
                        None
                    } else {
                        Some(ChatMessage::assistant(content))
                    }
                }
                ChatMessage::ToolResult { .. } => None,
                other => Some(other),
            })
            .collect(),
    }
}

/// Model-facing text for a tool result value: raw strings pass through,
/// objects prefer their summary line.
fn summary_text(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other
            .get("summary")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

async fn emit(
    events: &mpsc::Sender<ExecutionEvent>,
    event: ExecutionEvent,
) -> Result<(), SwitchboardError> {
    events
        .send(event)
        .await
        .map_err(|_| SwitchboardError::Internal("event channel closed mid-run".to_string()))
}

// ============================================================================
// Tests
// ============================================================================
