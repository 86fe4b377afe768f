//! Tool execution behind the agent runner.
//!
//! The runner is generic over a [`ToolExecutor`]; the concrete
//! [`CommandToolExecutor`] maps the two standard tools onto the command
//! crate. Catalog lookups resolve in-process; `run_command` parses the
//! slash string and goes through the dispatcher with the caller's bearer
//! token, so tool calls carry per-request auth without the graph knowing
//! about credentials.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use switchboard_command::{parse_command, CommandDispatcher, DispatchOutcome, DispatchReport};
use switchboard_core::{AgentError, ErrorClass, SwitchboardError};

/// Catalog lookup tool owned by the discovery node.
pub const LOOKUP_COMMAND_TOOL: &str = "lookup_command";
/// Dispatcher tool owned by the execution node.
pub const RUN_COMMAND_TOOL: &str = "run_command";

// ============================================================================
// EXECUTOR TRAIT
// ============================================================================

/// Outcome of one tool invocation, ready for the event channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Value surfaced to the model and the transport.
    pub result: Value,
    /// Rendered slash command when the tool maps to one.
    pub command: Option<String>,
    /// Set when the tool ran but reported a failure.
    pub error_class: Option<ErrorClass>,
}

impl ToolOutput {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            command: None,
            error_class: None,
        }
    }

    pub fn failed(result: Value, class: ErrorClass) -> Self {
        Self {
            result,
            command: None,
            error_class: Some(class),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// Executes the named tools a graph's nodes declare.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Render what this call will run, for log records. `None` when the
    /// tool does not map to a slash command.
    fn render_command(&self, _tool: &str, _arguments: &Value) -> Option<String> {
        None
    }

    /// Run one named tool. `Err` is reserved for tools the executor does
    /// not recognize; a command that runs and fails comes back as a
    /// [`ToolOutput`] carrying an error class, so the model can react to
    /// the failure instead of the whole run aborting.
    async fn execute(&self, tool: &str, arguments: &Value) -> Result<ToolOutput, AgentError>;
}

// ============================================================================
// COMMAND-BACKED EXECUTOR
// ============================================================================

/// [`ToolExecutor`] over the command dispatcher and its catalog.
pub struct CommandToolExecutor {
    dispatcher: Arc<CommandDispatcher>,
    bearer_token: Option<String>,
}

impl CommandToolExecutor {
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            bearer_token: None,
        }
    }

    /// Attach the caller's bearer token; forwarded on every dispatch.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn lookup(&self, arguments: &Value) -> ToolOutput {
        let query = argument_str(arguments, "query").unwrap_or_default();
        let query_words = significant_words(query);
        let catalog = self.dispatcher.catalog();

        let matched: Vec<_> = catalog
            .entries()
            .iter()
            .filter(|entry| {
                let mut tokens = significant_words(&entry.server_id);
                tokens.extend(significant_words(&entry.command));
                tokens.extend(entry.continuation_verbs.iter().map(|v| v.to_ascii_lowercase()));
                tokens.iter().any(|token| query_words.contains(token))
            })
            .collect();

        let reference = if matched.is_empty() {
            catalog.render_reference()
        } else {
            let mut out = String::from("Matching commands:\n");
            for entry in &matched {
                out.push_str(&format!("  {}\n      {}\n", entry.signature(), entry.description));
            }
            out
        };
        ToolOutput::ok(json!({
            "reference": reference,
            "matched": matched.iter().map(|e| e.tool_name()).collect::<Vec<_>>(),
        }))
    }

    async fn run(&self, arguments: &Value) -> ToolOutput {
        let Some(raw) = command_argument(arguments) else {
            return ToolOutput::failed(
                json!({
                    "status": "failed",
                    "summary": "The run_command tool needs a 'command' argument holding a full slash command.",
                }),
                ErrorClass::CommandExecution,
            );
        };
        let command = match parse_command(raw) {
            Ok(command) => command,
            Err(err) => {
                let err = SwitchboardError::from(err);
                return ToolOutput::failed(
                    json!({ "status": "failed", "summary": err.user_message() }),
                    err.classify(),
                )
                .with_command(raw.trim());
            }
        };
        let rendered = command.to_string();
        let report = self
            .dispatcher
            .dispatch(command, self.bearer_token.as_deref())
            .await;
        ToolOutput {
            result: report_value(&report),
            command: Some(rendered),
            error_class: report.error_class(),
        }
    }
}

#[async_trait]
impl ToolExecutor for CommandToolExecutor {
    fn render_command(&self, tool: &str, arguments: &Value) -> Option<String> {
        if tool != RUN_COMMAND_TOOL {
            return None;
        }
        command_argument(arguments).map(|raw| raw.trim().to_string())
    }

    async fn execute(&self, tool: &str, arguments: &Value) -> Result<ToolOutput, AgentError> {
        match tool {
            LOOKUP_COMMAND_TOOL => Ok(self.lookup(arguments)),
            RUN_COMMAND_TOOL => Ok(self.run(arguments).await),
            other => Err(AgentError::ToolFailed {
                tool: other.to_string(),
                message: "not a tool this executor provides".to_string(),
            }),
        }
    }
}

impl fmt::Debug for CommandToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandToolExecutor")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Words of three characters or more, lowercased. Short glue words never
/// decide a catalog match.
fn significant_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn argument_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

fn command_argument(arguments: &Value) -> Option<&str> {
    match arguments {
        // Argument buffers that never parsed as JSON arrive as one raw
        // string; treat it as the command and let the parser judge it.
        Value::String(raw) => Some(raw.as_str()),
        other => other.get("command").and_then(Value::as_str),
    }
}

/// JSON the model sees for a dispatch report.
pub fn report_value(report: &DispatchReport) -> Value {
    let status = match &report.outcome {
        DispatchOutcome::Success { .. } => "ok",
        DispatchOutcome::NoMatch { .. } => "no_match",
        DispatchOutcome::AuthRequired { .. } => "auth_required",
        DispatchOutcome::Failed { .. } => "failed",
    };
    let mut value = json!({
        "status": status,
        "summary": report.summary(),
    });
    if let DispatchOutcome::Success { result } = &report.outcome {
        value["result"] = result.clone();
    }
    if report.discovery_attempted {
        value["candidates_tried"] = json!(report.candidates_tried);
    }
    value
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use switchboard_command::{CommandCatalog, CommandGateway, CommandInvocation, CommandOutcome};
    use switchboard_core::{CommandError, ParsedCommand};

    struct StubGateway {
        calls: Mutex<Vec<CommandInvocation>>,
        outcome: CommandOutcome,
    }

    impl StubGateway {
        fn succeeding(result: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                outcome: CommandOutcome::Success { result },
            })
        }

        fn calls(&self) -> Vec<CommandInvocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandGateway for StubGateway {
        async fn execute(
            &self,
            invocation: &CommandInvocation,
        ) -> Result<CommandOutcome, CommandError> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(self.outcome.clone())
        }
    }

    fn executor_with(gateway: Arc<StubGateway>) -> CommandToolExecutor {
        let dispatcher = CommandDispatcher::new(Arc::new(CommandCatalog::builtin()), gateway);
        CommandToolExecutor::new(Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn run_command_dispatches_and_renders_the_command() {
        let gateway = StubGateway::succeeding(json!({"results": 3}));
        let executor = executor_with(gateway.clone());
        let arguments = json!({"command": "/web search query=\"rust streams\""});

        let rendered = executor.render_command(RUN_COMMAND_TOOL, &arguments);
        assert_eq!(rendered.as_deref(), Some("/web search query=\"rust streams\""));

        let output = executor.execute(RUN_COMMAND_TOOL, &arguments).await.unwrap();
        assert!(output.error_class.is_none());
        assert_eq!(output.result["status"], "ok");
        assert!(output.command.unwrap().starts_with("/web search"));
        assert_eq!(gateway.calls().len(), 1);
        assert_eq!(gateway.calls()[0].command.arg("query"), Some("rust streams"));
    }

    #[tokio::test]
    async fn malformed_command_comes_back_inline_not_as_err() {
        let gateway = StubGateway::succeeding(json!({}));
        let executor = executor_with(gateway.clone());
        let output = executor
            .execute(RUN_COMMAND_TOOL, &json!({"command": "/web"}))
            .await
            .unwrap();
        assert_eq!(output.result["status"], "failed");
        assert_eq!(output.error_class, Some(ErrorClass::Validation));
        assert!(gateway.calls().is_empty(), "parser rejected it before dispatch");
    }

    #[tokio::test]
    async fn missing_command_argument_fails_cleanly() {
        let executor = executor_with(StubGateway::succeeding(json!({})));
        let output = executor
            .execute(RUN_COMMAND_TOOL, &json!({"other": 1}))
            .await
            .unwrap();
        assert_eq!(output.error_class, Some(ErrorClass::CommandExecution));
        assert!(output.result["summary"]
            .as_str()
            .unwrap()
            .contains("'command' argument"));
    }

    #[tokio::test]
    async fn raw_string_arguments_are_treated_as_the_command() {
        let gateway = StubGateway::succeeding(json!("ok"));
        let executor = executor_with(gateway.clone());
        let output = executor
            .execute(RUN_COMMAND_TOOL, &Value::String("/web search query=rust".to_string()))
            .await
            .unwrap();
        assert_eq!(output.result["status"], "ok");
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn auth_required_surfaces_without_touching_the_gateway() {
        let gateway = StubGateway::succeeding(json!({}));
        let executor = executor_with(gateway.clone());
        let output = executor
            .execute(
                RUN_COMMAND_TOOL,
                &json!({"command": "/email-mcp send_test_email subject=hi body=there"}),
            )
            .await
            .unwrap();
        assert_eq!(output.result["status"], "auth_required");
        assert_eq!(output.error_class, Some(ErrorClass::AuthenticationRequired));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn bearer_token_unlocks_auth_guarded_commands() {
        let gateway = StubGateway::succeeding(json!({"sent": true}));
        let executor = executor_with(gateway.clone()).with_bearer_token("tok-1");
        let output = executor
            .execute(
                RUN_COMMAND_TOOL,
                &json!({"command": "/email-mcp send_test_email subject=hi body=there"}),
            )
            .await
            .unwrap();
        assert_eq!(output.result["status"], "ok");
        assert_eq!(gateway.calls()[0].bearer_token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn lookup_matches_catalog_entries_by_word() {
        let executor = executor_with(StubGateway::succeeding(json!({})));
        let output = executor
            .execute(
                LOOKUP_COMMAND_TOOL,
                &json!({"query": "what commands can I use for email?"}),
            )
            .await
            .unwrap();
        let matched: Vec<&str> = output.result["matched"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(matched.contains(&"email-mcp__send_test_email"), "matched: {matched:?}");
        assert!(output.result["reference"]
            .as_str()
            .unwrap()
            .contains("/email-mcp send_test_email"));
    }

    #[tokio::test]
    async fn lookup_without_match_returns_the_full_reference() {
        let executor = executor_with(StubGateway::succeeding(json!({})));
        let output = executor
            .execute(LOOKUP_COMMAND_TOOL, &json!({"query": "zzz nothing here"}))
            .await
            .unwrap();
        assert_eq!(output.result["matched"], json!([]));
        assert!(output.result["reference"]
            .as_str()
            .unwrap()
            .starts_with("Available commands:"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_failure() {
        let executor = executor_with(StubGateway::succeeding(json!({})));
        let err = executor.execute("weird_tool", &json!({})).await.unwrap_err();
        match err {
            AgentError::ToolFailed { tool, .. } => assert_eq!(tool, "weird_tool"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn render_command_ignores_other_tools() {
        let executor = executor_with(StubGateway::succeeding(json!({})));
        assert_eq!(
            executor.render_command(LOOKUP_COMMAND_TOOL, &json!({"query": "email"})),
            None
        );
    }

    #[test]
    fn debug_never_prints_the_bearer_token() {
        let executor =
            executor_with(StubGateway::succeeding(json!({}))).with_bearer_token("secret-token");
        let rendered = format!("{executor:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn report_value_carries_discovery_trail() {
        let report = DispatchReport {
            command: ParsedCommand::new("tickets", "find_event"),
            outcome: DispatchOutcome::NoMatch {
                message: "No match found for 'super-bowl-lix'.".to_string(),
            },
            discovery_attempted: true,
            candidates_tried: vec!["halftime-show".to_string()],
        };
        let value = report_value(&report);
        assert_eq!(value["status"], "no_match");
        assert_eq!(value["candidates_tried"], json!(["halftime-show"]));
    }
}
