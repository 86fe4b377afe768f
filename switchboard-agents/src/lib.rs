//! Switchboard Agents - Handoff Graph Execution
//!
//! The agent-runner strategy: a small directed graph of named agent nodes,
//! each owning a concrete tool list and explicit handoff edges, driven for
//! at most a fixed number of activations per request.
//!
//! The graph for the standard turn wires four nodes. An orchestrator routes
//! by decision table, a discovery node resolves the command catalog without
//! spending a model call, a tool-execution node loops the model against the
//! command dispatcher, and a final-answer node synthesizes with no tools at
//! all. Tool lists are always concrete arrays so providers that reject a
//! missing `tools` field behave the same as ones that tolerate it.

pub mod executor;
pub mod graph;
pub mod runner;

pub use executor::{
    report_value, CommandToolExecutor, ToolExecutor, ToolOutput, LOOKUP_COMMAND_TOOL,
    RUN_COMMAND_TOOL,
};
pub use graph::{
    route_turn, standard_graph, wants_execution, AgentGraph, AgentGraphBuilder, AgentNode,
    HandoffEdge, InputFilter, RoutingDecision, RoutingPolicy, ToolBinding, COMMAND_DISCOVERY,
    FINAL_ANSWER, ORCHESTRATOR, TOOL_EXECUTION,
};
pub use runner::{AgentRunner, RunSummary, DEFAULT_MAX_TURNS};
