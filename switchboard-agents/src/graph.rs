//! Agent handoff graph: named nodes with declared tool sets and outgoing
//! handoff edges.
//!
//! The graph is static for the lifetime of one request. Control flow is
//! deterministic: the entry node routes by [`route_turn`], a plain decision
//! table over the classifier's output, and the model is free-form only
//! inside the tool-loop and synthesis nodes. Every node's tool list is a
//! concrete, possibly empty, vector; an absent list never reaches the
//! execution backend.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use switchboard_command::{is_slash_command, CommandCatalog};
use switchboard_core::{AgentError, Intent, IntentClassification};
use switchboard_llm::ToolSpec;

use crate::executor::{LOOKUP_COMMAND_TOOL, RUN_COMMAND_TOOL};

// ============================================================================
// NODE NAMES
// ============================================================================

/// Entry node; routes each turn along one of its handoff edges.
pub const ORCHESTRATOR: &str = "Orchestrator";
/// Explains named integrations; may delegate to execution.
pub const COMMAND_DISCOVERY: &str = "Command-Discovery";
/// Runs slash commands through the dispatcher.
pub const TOOL_EXECUTION: &str = "Tool-Execution";
/// Pure text synthesis; zero tools.
pub const FINAL_ANSWER: &str = "Final-Answer";

// ============================================================================
// NODE BEHAVIOR
// ============================================================================

/// How the runner drives a node when it becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Route along a handoff edge chosen by the decision table; no model
    /// call.
    DecisionTable,
    /// Resolve the query against the command catalog, then answer with
    /// usage text or delegate to execution; no model call.
    CatalogLookup,
    /// Model-driven loop over the node's tools until the model stops
    /// calling them or transfers away.
    ToolLoop,
    /// One model call with no tools; the text is the final output.
    Synthesize,
}

/// A tool one node exposes to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments object.
    pub input_schema: Value,
}

impl ToolBinding {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// How much of the working conversation a handoff target receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFilter {
    /// The full transcript, tool calls and results included.
    All,
    /// User messages and non-empty assistant prose only; tool calls and
    /// tool results are stripped.
    ContentOnly,
}

/// Directed edge letting one node transfer control to another. The edge
/// doubles as a pseudo-tool: its name is what the model calls to request
/// the transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffEdge {
    /// Pseudo-tool name, e.g. `transfer_to_final_answer`.
    pub name: String,
    pub description: String,
    pub target_agent: String,
    pub input_filter: InputFilter,
}

impl HandoffEdge {
    /// Edge to `target_agent` with a name derived from the target
    /// (`Final-Answer` becomes `transfer_to_final_answer`).
    pub fn new(target_agent: impl Into<String>) -> Self {
        let target_agent = target_agent.into();
        let name = format!(
            "transfer_to_{}",
            target_agent.to_ascii_lowercase().replace(['-', ' '], "_")
        );
        Self {
            name,
            description: String::new(),
            target_agent,
            input_filter: InputFilter::All,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_filter(mut self, input_filter: InputFilter) -> Self {
        self.input_filter = input_filter;
        self
    }

    /// Pseudo-tool definition offered alongside the node's real tools.
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: json!({ "type": "object", "properties": {}, "required": [] }),
        }
    }
}

/// One agent in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub name: String,
    pub routing_policy: RoutingPolicy,
    /// Prompt fragment appended to the request system prompt for this
    /// node's model calls. Unused by the deterministic policies.
    pub instructions: String,
    /// Always concrete; an agent without tools carries an empty vector.
    pub tools: Vec<ToolBinding>,
    pub handoffs: Vec<HandoffEdge>,
}

impl AgentNode {
    pub fn new(name: impl Into<String>, routing_policy: RoutingPolicy) -> Self {
        Self {
            name: name.into(),
            routing_policy,
            instructions: String::new(),
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool(mut self, tool: ToolBinding) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_handoff(mut self, handoff: HandoffEdge) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Outgoing edge whose target is `target_agent`.
    pub fn handoff_to(&self, target_agent: &str) -> Option<&HandoffEdge> {
        self.handoffs.iter().find(|e| e.target_agent == target_agent)
    }

    /// Outgoing edge whose pseudo-tool name is `name`.
    pub fn handoff_named(&self, name: &str) -> Option<&HandoffEdge> {
        self.handoffs.iter().find(|e| e.name == name)
    }
}

// ============================================================================
// GRAPH
// ============================================================================

/// Validated agent graph. Construct through [`AgentGraph::builder`]; a
/// built graph always has an entry node and only resolvable handoffs.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    nodes: Vec<AgentNode>,
    entry_index: usize,
}

impl AgentGraph {
    pub fn builder() -> AgentGraphBuilder {
        AgentGraphBuilder {
            entry: None,
            nodes: Vec::new(),
        }
    }

    pub fn entry_node(&self) -> &AgentNode {
        &self.nodes[self.entry_index]
    }

    pub fn node(&self, name: &str) -> Option<&AgentNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn nodes(&self) -> &[AgentNode] {
        &self.nodes
    }
}

#[derive(Debug, Clone)]
pub struct AgentGraphBuilder {
    entry: Option<String>,
    nodes: Vec<AgentNode>,
}

impl AgentGraphBuilder {
    pub fn node(mut self, node: AgentNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Name the entry node. Defaults to the first node added.
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn build(self) -> Result<AgentGraph, AgentError> {
        if self.nodes.is_empty() {
            return Err(AgentError::GraphConstruction {
                reason: "graph has no nodes".to_string(),
            });
        }

        let mut node_names = HashSet::new();
        for node in &self.nodes {
            if !node_names.insert(node.name.as_str()) {
                return Err(AgentError::GraphConstruction {
                    reason: format!("duplicate node name '{}'", node.name),
                });
            }
        }

        for node in &self.nodes {
            let mut call_names = HashSet::new();
            for tool in &node.tools {
                if !call_names.insert(tool.name.as_str()) {
                    return Err(AgentError::GraphConstruction {
                        reason: format!("node '{}' declares tool '{}' twice", node.name, tool.name),
                    });
                }
            }
            for edge in &node.handoffs {
                if !call_names.insert(edge.name.as_str()) {
                    return Err(AgentError::GraphConstruction {
                        reason: format!(
                            "handoff '{}' on node '{}' collides with another tool name",
                            edge.name, node.name
                        ),
                    });
                }
                if edge.target_agent == node.name {
                    return Err(AgentError::GraphConstruction {
                        reason: format!("node '{}' hands off to itself", node.name),
                    });
                }
                if !node_names.contains(edge.target_agent.as_str()) {
                    return Err(AgentError::GraphConstruction {
                        reason: format!(
                            "handoff '{}' on node '{}' targets unknown agent '{}'",
                            edge.name, node.name, edge.target_agent
                        ),
                    });
                }
            }
        }

        let entry = match &self.entry {
            Some(name) => name.clone(),
            None => self.nodes[0].name.clone(),
        };
        let entry_index = self
            .nodes
            .iter()
            .position(|n| n.name == entry)
            .ok_or_else(|| AgentError::GraphConstruction {
                reason: format!("entry node '{entry}' is not in the graph"),
            })?;

        Ok(AgentGraph {
            nodes: self.nodes,
            entry_index,
        })
    }
}

// ============================================================================
// STANDARD GRAPH
// ============================================================================

const FINAL_ANSWER_INSTRUCTIONS: &str = "Write the reply to the user. Ground it in the \
    conversation, any command results, and any document context provided. Be direct and \
    concrete; never mention internal tooling or agent names.";

fn execution_instructions(catalog: &CommandCatalog) -> String {
    format!(
        "Fulfill the user's request by running slash commands with the `{RUN_COMMAND_TOOL}` \
         tool, one command per call. Use /memory store content=\"...\" to save facts and \
         /memory recall query=\"...\" to look them up. Summarize what each command returned, \
         then transfer to {FINAL_ANSWER}.\n\n{}",
        catalog.render_reference()
    )
}

/// The four-node conversation graph: Orchestrator routes, Command-Discovery
/// explains, Tool-Execution owns the dispatcher as its only tool, and
/// Final-Answer closes with prose and zero tools.
pub fn standard_graph(catalog: &CommandCatalog) -> Result<AgentGraph, AgentError> {
    let run_command = ToolBinding::new(
        RUN_COMMAND_TOOL,
        "Execute one slash command against a connected integration.",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Full slash command, e.g. /web search query=\"rust streams\"",
                }
            },
            "required": ["command"],
        }),
    );
    let lookup_command = ToolBinding::new(
        LOOKUP_COMMAND_TOOL,
        "Look up integrations in the command catalog by name or purpose.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Free-text description of the integration",
                }
            },
            "required": ["query"],
        }),
    );

    AgentGraph::builder()
        .node(
            AgentNode::new(ORCHESTRATOR, RoutingPolicy::DecisionTable)
                .with_instructions("Routes each turn to the specialist that can finish it.")
                .with_handoff(
                    HandoffEdge::new(COMMAND_DISCOVERY)
                        .with_description("Explain or look up available integrations."),
                )
                .with_handoff(
                    HandoffEdge::new(TOOL_EXECUTION)
                        .with_description("Run slash commands and memory operations."),
                )
                .with_handoff(
                    HandoffEdge::new(FINAL_ANSWER)
                        .with_description("Answer directly from the conversation and context."),
                ),
        )
        .node(
            AgentNode::new(COMMAND_DISCOVERY, RoutingPolicy::CatalogLookup)
                .with_instructions(
                    "Explains what the connected integrations do and how to invoke them.",
                )
                .with_tool(lookup_command)
                .with_handoff(
                    HandoffEdge::new(TOOL_EXECUTION)
                        .with_description("Run the command the user asked for."),
                ),
        )
        .node(
            AgentNode::new(TOOL_EXECUTION, RoutingPolicy::ToolLoop)
                .with_instructions(execution_instructions(catalog))
                .with_tool(run_command)
                .with_handoff(
                    HandoffEdge::new(FINAL_ANSWER)
                        .with_description("Compose the reply once the command results are in.")
                        .with_input_filter(InputFilter::ContentOnly),
                ),
        )
        .node(
            AgentNode::new(FINAL_ANSWER, RoutingPolicy::Synthesize)
                .with_instructions(FINAL_ANSWER_INSTRUCTIONS),
        )
        .entry(ORCHESTRATOR)
        .build()
}

// ============================================================================
// ROUTING DECISION TABLE
// ============================================================================

/// Where the orchestrator sends one turn, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub target: &'static str,
    pub reason: &'static str,
}

/// Deterministic routing over the classifier's verdict. An explicit slash
/// command always wins; command talk goes to discovery; memory operations
/// go straight to execution; everything else is answered by the synthesis
/// node, with or without injected document context.
pub fn route_turn(classification: &IntentClassification, query: &str) -> RoutingDecision {
    if is_slash_command(query) {
        return RoutingDecision {
            target: TOOL_EXECUTION,
            reason: "slash_command",
        };
    }
    match classification.intent {
        Intent::Command => RoutingDecision {
            target: COMMAND_DISCOVERY,
            reason: "command_intent",
        },
        Intent::Memory => RoutingDecision {
            target: TOOL_EXECUTION,
            reason: "memory_intent",
        },
        Intent::Document | Intent::Hybrid => RoutingDecision {
            target: FINAL_ANSWER,
            reason: "document_context",
        },
        Intent::Web | Intent::Unknown => RoutingDecision {
            target: FINAL_ANSWER,
            reason: "direct_answer",
        },
    }
}

/// Imperative verbs that turn a command question into a command run.
const EXECUTION_VERBS: [&str; 8] = [
    "run", "execute", "send", "trigger", "perform", "launch", "dispatch", "fire",
];

/// True when the user is asking for a command to be run rather than
/// explained. Whole-word match, ASCII case-insensitive.
pub fn wants_execution(query: &str) -> bool {
    if is_slash_command(query) {
        return true;
    }
    let words: Vec<String> = query
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect();
    EXECUTION_VERBS
        .iter()
        .any(|verb| words.iter().any(|w| w == verb))
}

// ============================================================================
// Tests
// ============================================================================
