//! Transport to the external command executor.
//!
//! The dispatcher talks to a [`CommandGateway`] trait object so the engine
//! can run against the HTTP executor in production and scripted gateways
//! in tests. Executors distinguish "ran and found nothing" from "failed";
//! that difference is load-bearing for the retry-search sequence, so the
//! gateway surfaces it as an explicit [`CommandOutcome`] instead of prose.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use switchboard_core::{CommandError, ParsedCommand};

// ============================================================================
// Invocation and outcome
// ============================================================================

/// A parsed command plus the caller credential forwarded with it.
#[derive(Clone)]
pub struct CommandInvocation {
    pub command: ParsedCommand,
    pub bearer_token: Option<String>,
}

impl CommandInvocation {
    pub fn new(command: ParsedCommand) -> Self {
        Self {
            command,
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl fmt::Debug for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInvocation")
            .field("command", &self.command)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Terminal executor verdict for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command ran; `result` is the executor payload.
    Success { result: Value },
    /// The command ran but the requested entity does not exist. This is
    /// not an error: lookup commands use it to trigger discovery.
    NotFound { message: String },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandOutcome::NotFound { .. })
    }
}

#[async_trait]
pub trait CommandGateway: Send + Sync {
    async fn execute(&self, invocation: &CommandInvocation)
        -> Result<CommandOutcome, CommandError>;
}

// ============================================================================
// HTTP gateway
// ============================================================================

/// Gateway backed by the HTTP command executor.
pub struct HttpCommandGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCommandGateway {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, CommandError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CommandError::Transport {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl fmt::Debug for HttpCommandGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCommandGateway")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Wire envelope returned by the executor.
#[derive(Debug, Deserialize)]
struct GatewayEnvelope {
    status: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl CommandGateway for HttpCommandGateway {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandOutcome, CommandError> {
        let command = &invocation.command;
        tracing::debug!(
            server_id = %command.server_id,
            command = %command.command,
            "executing command via gateway"
        );

        let mut request = self
            .client
            .post(format!("{}/execute", self.base_url))
            .json(command);
        if let Some(token) = &invocation.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| CommandError::Transport {
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            let envelope: GatewayEnvelope =
                response.json().await.map_err(|e| CommandError::Transport {
                    message: format!("unreadable gateway response: {e}"),
                })?;
            return decode_envelope(envelope, command);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_error_status(status.as_u16(), &body, command))
    }
}

fn decode_envelope(
    envelope: GatewayEnvelope,
    command: &ParsedCommand,
) -> Result<CommandOutcome, CommandError> {
    match envelope.status.as_str() {
        "ok" => Ok(CommandOutcome::Success {
            result: envelope.result,
        }),
        "not_found" => Ok(CommandOutcome::NotFound {
            message: envelope
                .message
                .unwrap_or_else(|| "the requested entity was not found".to_string()),
        }),
        other => Err(CommandError::ExecutionFailed {
            server_id: command.server_id.clone(),
            command: command.command.clone(),
            message: format!("executor returned unknown status '{other}'"),
        }),
    }
}

/// Map a non-2xx executor status onto the command error family.
fn map_error_status(status: u16, body: &str, command: &ParsedCommand) -> CommandError {
    match status {
        401 | 403 => CommandError::AuthenticationRequired {
            server_id: command.server_id.clone(),
        },
        404 => CommandError::UnknownServer {
            server_id: command.server_id.clone(),
        },
        _ => CommandError::ExecutionFailed {
            server_id: command.server_id.clone(),
            command: command.command.clone(),
            message: format!("executor returned status {status}: {}", truncate(body, 200)),
        },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============================================================================
// Local gateway
// ============================================================================

/// In-process gateway for running without an executor deployment. Memory
/// commands work against process-local state; everything else fails with
/// a clear message instead of hanging.
#[derive(Debug, Default)]
pub struct LocalCommandGateway {
    memory: Mutex<Vec<String>>,
}

impl LocalCommandGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandGateway for LocalCommandGateway {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandOutcome, CommandError> {
        let command = &invocation.command;
        match (command.server_id.as_str(), command.command.as_str()) {
            ("memory", "store") => {
                let content = command
                    .arg("content")
                    .map(str::to_string)
                    .or_else(|| command.positional_args.first().cloned())
                    .unwrap_or_default();
                if content.is_empty() {
                    return Err(CommandError::ExecutionFailed {
                        server_id: command.server_id.clone(),
                        command: command.command.clone(),
                        message: "nothing to store: pass content=...".to_string(),
                    });
                }
                let mut memory = self
                    .memory
                    .lock()
                    .map_err(|_| CommandError::Transport {
                        message: "local memory store is poisoned".to_string(),
                    })?;
                memory.push(content);
                Ok(CommandOutcome::Success {
                    result: json!({ "stored": true, "count": memory.len() }),
                })
            }
            ("memory", "recall") => {
                let query = command
                    .arg("query")
                    .map(str::to_string)
                    .or_else(|| command.positional_args.first().cloned())
                    .unwrap_or_default()
                    .to_lowercase();
                let memory = self
                    .memory
                    .lock()
                    .map_err(|_| CommandError::Transport {
                        message: "local memory store is poisoned".to_string(),
                    })?;
                let matches: Vec<&String> = memory
                    .iter()
                    .filter(|entry| entry.to_lowercase().contains(&query))
                    .collect();
                if matches.is_empty() {
                    Ok(CommandOutcome::NotFound {
                        message: "no stored memories match that query".to_string(),
                    })
                } else {
                    Ok(CommandOutcome::Success {
                        result: json!({ "matches": matches }),
                    })
                }
            }
            (server_id, command_name) => Err(CommandError::ExecutionFailed {
                server_id: server_id.to_string(),
                command: command_name.to_string(),
                message: "this integration is not connected in local mode".to_string(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
