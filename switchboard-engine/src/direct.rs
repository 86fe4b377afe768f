//! Direct-call strategy: one streamed model call, then command execution.
//!
//! No graph, no handoffs. The whole command catalog rides in the system
//! prompt, and the model answers in a single streamed completion.
//! Structured tool calls are the preferred way for the model to request a
//! command; when a provider cannot do tools, full slash commands written on
//! their own line in the reply text are scraped out and executed instead,
//! flagged as such on the transport.
//!
//! After the model's reply, at most one automatic continuation runs: when
//! the user asked for a follow-up action in prose ("email it to me") and
//! the catalog recognizes the verb, the matching command is synthesized
//! from the turn's output and dispatched once.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

use switchboard_command::{
    parse_command, CatalogEntry, CommandCatalog, CommandDispatcher, DispatchReport,
};
use switchboard_agents::report_value;
use switchboard_core::message::latest_user_message;
use switchboard_core::{
    ConversationMessage, ExecutionEvent, MessageRole, ParsedCommand, SwitchboardError,
};
use switchboard_llm::{ChatMessage, ChatProvider, ChatRequest, StreamCollector, ToolSpec};

/// Agent label stamped on every event this strategy emits.
pub const DIRECT_CALL_AGENT: &str = "Direct-Call";

/// Slash commands written on their own line in reply text.
static COMMAND_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(/[A-Za-z][\w-]*\s+\S[^\r\n]*)").expect("static command-line pattern")
});

/// How much of the turn's payload is spilled into secondary required
/// parameters when a continuation command is synthesized.
const SYNTHESIZED_PARAM_CHARS: usize = 80;

/// What the direct call did, for the selector's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectSummary {
    pub content_chars: usize,
    pub commands_run: usize,
    /// Commands were recovered from reply text rather than tool calls.
    pub scraped: bool,
    /// The automatic follow-up command ran.
    pub continued: bool,
}

/// Single-call execution strategy.
pub struct DirectCallStrategy {
    provider: Arc<dyn ChatProvider>,
    dispatcher: Arc<CommandDispatcher>,
    catalog: Arc<CommandCatalog>,
    bearer_token: Option<String>,
}

impl DirectCallStrategy {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        dispatcher: Arc<CommandDispatcher>,
        catalog: Arc<CommandCatalog>,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            catalog,
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Run one turn: stream the model, execute requested commands, and
    /// possibly run one continuation.
    pub async fn run(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        events: &mpsc::Sender<ExecutionEvent>,
    ) -> Result<DirectSummary, SwitchboardError> {
        let request = self.build_request(system_prompt, conversation);
        let mut stream = self.provider.stream_chat(request).await?;

        let mut collector = StreamCollector::new();
        while let Some(event) = stream.next().await {
            collector.absorb(&event?);
        }
        let completion = collector.finish();

        let mut summary = DirectSummary::default();
        if !completion.text.trim().is_empty() {
            summary.content_chars += completion.text.chars().count();
            send(events, ExecutionEvent::content(agent(), &completion.text)).await?;
        }

        // Commands the model asked for, structured calls first.
        let mut executed: HashSet<(String, String)> = HashSet::new();
        let mut last_report: Option<DispatchReport> = None;

        if !completion.tool_calls.is_empty() {
            for call in &completion.tool_calls {
                let Some(entry) = self.catalog.find_by_tool_name(&call.name) else {
                    tracing::debug!(tool = %call.name, "model requested an unknown tool");
                    continue;
                };
                let command = command_from_arguments(entry, &call.arguments);
                if !executed.insert((command.server_id.clone(), command.command.clone())) {
                    continue;
                }
                let report = self
                    .execute(command, serde_json::json!({ "source": "tool_call" }), events)
                    .await?;
                summary.commands_run += 1;
                summary.content_chars += report.summary().len();
                last_report = Some(report);
            }
        } else {
            for command in self.scrape_commands(&completion.text) {
                if !executed.insert((command.server_id.clone(), command.command.clone())) {
                    continue;
                }
                summary.scraped = true;
                let report = self
                    .execute(
                        command,
                        serde_json::json!({ "extraction": "text_scrape" }),
                        events,
                    )
                    .await?;
                summary.commands_run += 1;
                summary.content_chars += report.summary().len();
                last_report = Some(report);
            }
        }

        // At most one automatic follow-up, keyed on the user's own verbs.
        if let Some(entry) = self.continuation_entry(conversation, &executed) {
            let payload = last_report
                .as_ref()
                .map(|report| report.summary())
                .unwrap_or_else(|| completion.text.clone());
            if !payload.trim().is_empty() {
                let command = synthesize_continuation(entry, &payload);
                executed.insert((command.server_id.clone(), command.command.clone()));
                let report = self
                    .execute(command, serde_json::json!({ "continuation": true }), events)
                    .await?;
                summary.commands_run += 1;
                summary.content_chars += report.summary().len();
                summary.continued = true;
            }
        }

        Ok(summary)
    }

    fn build_request(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
    ) -> ChatRequest {
        let system = format!(
            "{system_prompt}\n\n{}\nWhen a command should run, call the matching tool. \
             If you cannot call tools, write the full slash command on its own line.",
            self.catalog.render_reference()
        );
        let mut messages = vec![ChatMessage::system(system)];
        for message in conversation {
            messages.push(match message.role {
                MessageRole::User => ChatMessage::user(&message.content),
                MessageRole::Assistant => ChatMessage::assistant(&message.content),
            });
        }

        let request = ChatRequest::new(messages);
        if self.provider.supports_tools() {
            let tools = self
                .catalog
                .entries()
                .iter()
                .map(|entry| ToolSpec {
                    name: entry.tool_name(),
                    description: entry.description.clone(),
                    input_schema: entry.input_schema(),
                })
                .collect();
            request.with_tools(tools)
        } else {
            request
        }
    }

    /// Slash commands on their own lines in reply text. Lines that fail to
    /// parse or name an unknown integration are skipped.
    fn scrape_commands(&self, text: &str) -> Vec<ParsedCommand> {
        let mut commands = Vec::new();
        for capture in COMMAND_LINE.captures_iter(text) {
            let line = capture[1].trim();
            match parse_command(line) {
                Ok(command) => {
                    if !self.catalog.server_exists(&command.server_id) {
                        tracing::debug!(server = %command.server_id, "scraped command names an unknown integration");
                        continue;
                    }
                    commands.push(command);
                }
                Err(error) => {
                    tracing::debug!(%line, %error, "scraped line did not parse as a command");
                }
            }
        }
        commands
    }

    fn continuation_entry<'a>(
        &'a self,
        conversation: &[ConversationMessage],
        executed: &HashSet<(String, String)>,
    ) -> Option<&'a CatalogEntry> {
        let latest = latest_user_message(conversation)?;
        let entry = self.catalog.match_continuation(&latest.content)?;
        if executed.contains(&(entry.server_id.clone(), entry.command.clone())) {
            return None;
        }
        Some(entry)
    }

    async fn execute(
        &self,
        command: ParsedCommand,
        metadata: serde_json::Value,
        events: &mpsc::Sender<ExecutionEvent>,
    ) -> Result<DispatchReport, SwitchboardError> {
        let rendered = command.to_string();
        send(
            events,
            ExecutionEvent::tool_call(
                agent(),
                "dispatch_command",
                Some(rendered.clone()),
                metadata,
            ),
        )
        .await?;

        let report = self
            .dispatcher
            .dispatch(command, self.bearer_token.as_deref())
            .await;

        send(
            events,
            ExecutionEvent::tool_result(
                agent(),
                "dispatch_command",
                Some(rendered),
                report_value(&report),
            ),
        )
        .await?;
        if let Some(class) = report.error_class() {
            send(
                events,
                ExecutionEvent::error(class, report.summary()),
            )
            .await?;
        }
        send(events, ExecutionEvent::content(agent(), report.summary())).await?;
        Ok(report)
    }
}

fn agent() -> Option<String> {
    Some(DIRECT_CALL_AGENT.to_string())
}

async fn send(
    events: &mpsc::Sender<ExecutionEvent>,
    event: ExecutionEvent,
) -> Result<(), SwitchboardError> {
    events
        .send(event)
        .await
        .map_err(|_| SwitchboardError::Internal("event channel closed mid-run".to_string()))
}

/// Turn a structured tool-call argument object into a parsed command.
/// String values pass through; everything else is rendered as JSON.
fn command_from_arguments(entry: &CatalogEntry, arguments: &serde_json::Value) -> ParsedCommand {
    let mut command = ParsedCommand::new(&entry.server_id, &entry.command);
    if let Some(object) = arguments.as_object() {
        for (key, value) in object {
            let rendered = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            command = command.with_arg(key, rendered);
        }
    }
    command
}

/// Build the follow-up command from the turn's payload: the primary
/// parameter gets the whole payload, every other required parameter gets
/// its truncated first line.
fn synthesize_continuation(entry: &CatalogEntry, payload: &str) -> ParsedCommand {
    let mut command = ParsedCommand::new(&entry.server_id, &entry.command);
    let first_line: String = payload
        .lines()
        .next()
        .unwrap_or("")
        .chars()
        .take(SYNTHESIZED_PARAM_CHARS)
        .collect();
    for param in &entry.params {
        if entry.primary_param.as_deref() == Some(param.name.as_str()) {
            command = command.with_arg(&param.name, payload);
        } else if param.required {
            command = command.with_arg(&param.name, first_line.trim());
        }
    }
    command
}

// ============================================================================
// Tests
// ============================================================================
