//! Command dispatcher with lookup recovery.
//!
//! The dispatcher owns the per-command time budget and the policy for
//! what happens after a miss. Failures never propagate as `Err` to the
//! turn pipeline: every path ends in a [`DispatchReport`] whose outcome
//! carries a human-readable message, so one broken command degrades one
//! part of the answer instead of aborting the turn.
//!
//! When a lookup command reports not-found and its catalog entry carries
//! a discovery spec, the dispatcher runs one search pass: navigate the
//! browser integration to the search URL, wait for the page to settle,
//! snapshot it, pull candidate identifiers out with the entry's regex,
//! and retry the original command once per candidate. There is never a
//! second search pass; if every candidate misses, the report says no
//! match was found.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{CommandError, ErrorClass, ParsedCommand, SwitchboardError};

use crate::catalog::{CommandCatalog, DiscoverySpec};
use crate::gateway::{CommandGateway, CommandInvocation, CommandOutcome};

// ============================================================================
// Configuration and report types
// ============================================================================

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Budget for each gateway call, including discovery steps.
    pub command_timeout: Duration,
    /// Server id of the browser integration used for discovery.
    pub browser_server_id: String,
    /// Seconds the browser waits for a search page to settle.
    pub settle_seconds: u64,
    /// Maximum candidate identifiers retried after a miss.
    pub max_candidates: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            browser_server_id: "browser".to_string(),
            settle_seconds: 2,
            max_candidates: 5,
        }
    }
}

/// Terminal state of one dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success {
        result: Value,
    },
    /// The command ran but nothing matched, after any discovery retries.
    NoMatch {
        message: String,
    },
    /// The caller must link an account before this command can run.
    AuthRequired {
        message: String,
    },
    /// The command failed; `message` is ready to show the user.
    Failed {
        class: ErrorClass,
        message: String,
    },
}

/// Everything the pipeline needs to report one command's fate.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub command: ParsedCommand,
    pub outcome: DispatchOutcome,
    /// True when a lookup miss triggered the discovery search.
    pub discovery_attempted: bool,
    /// Candidate identifiers retried, in order.
    pub candidates_tried: Vec<String>,
}

impl DispatchReport {
    fn new(command: ParsedCommand, outcome: DispatchOutcome) -> Self {
        Self {
            command,
            outcome,
            discovery_attempted: false,
            candidates_tried: Vec::new(),
        }
    }

    /// Error class for failed outcomes; `None` when the command succeeded
    /// or simply found nothing.
    pub fn error_class(&self) -> Option<ErrorClass> {
        match &self.outcome {
            DispatchOutcome::AuthRequired { .. } => Some(ErrorClass::AuthenticationRequired),
            DispatchOutcome::Failed { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// One human-readable line describing the outcome, suitable for
    /// inclusion in the assistant's answer.
    pub fn summary(&self) -> String {
        match &self.outcome {
            DispatchOutcome::Success { result } => {
                let rendered = match result {
                    Value::String(s) => s.clone(),
                    Value::Null => "done".to_string(),
                    other => other.to_string(),
                };
                format!(
                    "Ran /{} {}: {}",
                    self.command.server_id, self.command.command, rendered
                )
            }
            DispatchOutcome::NoMatch { message }
            | DispatchOutcome::AuthRequired { message }
            | DispatchOutcome::Failed { message, .. } => message.clone(),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct CommandDispatcher {
    catalog: Arc<CommandCatalog>,
    gateway: Arc<dyn CommandGateway>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(catalog: Arc<CommandCatalog>, gateway: Arc<dyn CommandGateway>) -> Self {
        Self {
            catalog,
            gateway,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Run one parsed command to a terminal report.
    pub async fn dispatch(
        &self,
        command: ParsedCommand,
        bearer_token: Option<&str>,
    ) -> DispatchReport {
        if !self.catalog.server_exists(&command.server_id) {
            let err = SwitchboardError::from(CommandError::UnknownServer {
                server_id: command.server_id.clone(),
            });
            tracing::warn!(server_id = %command.server_id, "command for unknown server");
            return DispatchReport::new(
                command,
                DispatchOutcome::Failed {
                    class: err.classify(),
                    message: err.user_message(),
                },
            );
        }

        let entry = self.catalog.find(&command.server_id, &command.command);
        if let Some(entry) = entry {
            if entry.requires_auth && bearer_token.is_none() {
                let err = SwitchboardError::from(CommandError::AuthenticationRequired {
                    server_id: command.server_id.clone(),
                });
                return DispatchReport::new(
                    command,
                    DispatchOutcome::AuthRequired {
                        message: err.user_message(),
                    },
                );
            }
        }

        let invocation = invocation_for(&command, bearer_token);
        match self.execute_with_budget(&invocation).await {
            Ok(CommandOutcome::Success { result }) => {
                DispatchReport::new(command, DispatchOutcome::Success { result })
            }
            Ok(CommandOutcome::NotFound { message }) => {
                let discovery = entry.and_then(|e| e.discovery.clone());
                match discovery {
                    Some(discovery) => {
                        self.recover_from_miss(command, &discovery, bearer_token, message)
                            .await
                    }
                    None => DispatchReport::new(command, DispatchOutcome::NoMatch { message }),
                }
            }
            Err(err) => {
                tracing::error!(
                    server_id = %command.server_id,
                    command = %command.command,
                    error = %err,
                    class = err.classify().as_db_str(),
                    "command dispatch failed"
                );
                let outcome = match &err {
                    SwitchboardError::Command(CommandError::AuthenticationRequired { .. }) => {
                        DispatchOutcome::AuthRequired {
                            message: err.user_message(),
                        }
                    }
                    _ => DispatchOutcome::Failed {
                        class: err.classify(),
                        message: err.user_message(),
                    },
                };
                DispatchReport::new(command, outcome)
            }
        }
    }

    async fn execute_with_budget(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandOutcome, SwitchboardError> {
        match tokio::time::timeout(self.config.command_timeout, self.gateway.execute(invocation))
            .await
        {
            Ok(result) => result.map_err(SwitchboardError::from),
            Err(_) => Err(SwitchboardError::timeout(
                "command_gateway",
                self.config.command_timeout,
            )),
        }
    }

    /// One discovery pass after a lookup miss. Retries of the original
    /// command happen inside this pass; a miss on every candidate is
    /// terminal, never a second search.
    async fn recover_from_miss(
        &self,
        command: ParsedCommand,
        discovery: &DiscoverySpec,
        bearer_token: Option<&str>,
        first_miss: String,
    ) -> DispatchReport {
        let identifier = command
            .arg(&discovery.lookup_arg)
            .map(str::to_string)
            .or_else(|| command.positional_args.first().cloned());

        let Some(identifier) = identifier else {
            return DispatchReport {
                command,
                outcome: DispatchOutcome::NoMatch { message: first_miss },
                discovery_attempted: false,
                candidates_tried: Vec::new(),
            };
        };

        tracing::info!(
            server_id = %command.server_id,
            command = %command.command,
            identifier = %identifier,
            "lookup missed; running discovery search"
        );

        let candidates = self
            .discover_candidates(discovery, &identifier, bearer_token)
            .await;

        let mut tried = Vec::new();
        for candidate in candidates {
            tried.push(candidate.clone());
            let retry = command
                .clone()
                .with_arg(discovery.lookup_arg.clone(), candidate.clone());
            let invocation = invocation_for(&retry, bearer_token);
            match self.execute_with_budget(&invocation).await {
                Ok(CommandOutcome::Success { result }) => {
                    tracing::info!(candidate = %candidate, "discovery retry succeeded");
                    return DispatchReport {
                        command: retry,
                        outcome: DispatchOutcome::Success { result },
                        discovery_attempted: true,
                        candidates_tried: tried,
                    };
                }
                Ok(CommandOutcome::NotFound { .. }) => continue,
                Err(err) => {
                    tracing::warn!(candidate = %candidate, error = %err, "discovery retry failed");
                    continue;
                }
            }
        }

        let message = if tried.is_empty() {
            format!(
                "No match found for '{identifier}', and a search for alternatives \
                 turned up nothing."
            )
        } else {
            format!(
                "No match found for '{identifier}'. I also tried {} similar \
                 identifier(s) from a search without success.",
                tried.len()
            )
        };
        DispatchReport {
            command,
            outcome: DispatchOutcome::NoMatch { message },
            discovery_attempted: true,
            candidates_tried: tried,
        }
    }

    /// Navigate, settle, snapshot, extract. Every step failure is logged
    /// and degrades to an empty candidate list.
    async fn discover_candidates(
        &self,
        discovery: &DiscoverySpec,
        identifier: &str,
        bearer_token: Option<&str>,
    ) -> Vec<String> {
        let terms = identifier.replace(['-', '_'], " ");
        let url = discovery
            .search_url
            .replace("{query}", urlencoding::encode(&terms).as_ref());

        let navigate = ParsedCommand::new(self.config.browser_server_id.clone(), "navigate")
            .with_arg("url", url);
        match self
            .execute_with_budget(&invocation_for(&navigate, bearer_token))
            .await
        {
            Ok(outcome) if outcome.is_success() => {}
            Ok(_) => {
                tracing::warn!("discovery navigate reported not found; aborting search");
                return Vec::new();
            }
            Err(err) => {
                tracing::warn!(error = %err, "discovery navigate failed; aborting search");
                return Vec::new();
            }
        }

        let wait = ParsedCommand::new(self.config.browser_server_id.clone(), "wait")
            .with_arg("seconds", self.config.settle_seconds.to_string());
        if let Err(err) = self
            .execute_with_budget(&invocation_for(&wait, bearer_token))
            .await
        {
            // A failed settle is survivable; the snapshot may still work.
            tracing::warn!(error = %err, "discovery wait failed; snapshotting anyway");
        }

        let snapshot = ParsedCommand::new(self.config.browser_server_id.clone(), "snapshot");
        let page = match self
            .execute_with_budget(&invocation_for(&snapshot, bearer_token))
            .await
        {
            Ok(CommandOutcome::Success { result }) => match result {
                Value::String(text) => text,
                other => other.to_string(),
            },
            Ok(_) => {
                tracing::warn!("discovery snapshot reported not found; aborting search");
                return Vec::new();
            }
            Err(err) => {
                tracing::warn!(error = %err, "discovery snapshot failed; aborting search");
                return Vec::new();
            }
        };

        let pattern = match Regex::new(&discovery.candidate_pattern) {
            Ok(pattern) => pattern,
            Err(err) => {
                tracing::error!(
                    pattern = %discovery.candidate_pattern,
                    error = %err,
                    "invalid discovery pattern in catalog"
                );
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for captures in pattern.captures_iter(&page) {
            let Some(candidate) = captures.get(1).map(|m| m.as_str().to_string()) else {
                continue;
            };
            if candidate == identifier || !seen.insert(candidate.clone()) {
                continue;
            }
            candidates.push(candidate);
            if candidates.len() >= self.config.max_candidates {
                break;
            }
        }
        tracing::debug!(count = candidates.len(), "discovery extracted candidates");
        candidates
    }
}

fn invocation_for(command: &ParsedCommand, bearer_token: Option<&str>) -> CommandInvocation {
    let mut invocation = CommandInvocation::new(command.clone());
    if let Some(token) = bearer_token {
        invocation = invocation.with_bearer_token(token);
    }
    invocation
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Gateway driven by a closure, recording every invocation.
    struct FnGateway<F> {
        calls: Mutex<Vec<ParsedCommand>>,
        handler: F,
    }

    impl<F> FnGateway<F>
    where
        F: Fn(&ParsedCommand) -> Result<CommandOutcome, CommandError> + Send + Sync,
    {
        fn new(handler: F) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                handler,
            }
        }

        fn calls(&self) -> Vec<ParsedCommand> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<F> CommandGateway for FnGateway<F>
    where
        F: Fn(&ParsedCommand) -> Result<CommandOutcome, CommandError> + Send + Sync,
    {
        async fn execute(
            &self,
            invocation: &CommandInvocation,
        ) -> Result<CommandOutcome, CommandError> {
            self.calls.lock().unwrap().push(invocation.command.clone());
            (self.handler)(&invocation.command)
        }
    }

    fn dispatcher_with<F>(gateway: Arc<FnGateway<F>>) -> CommandDispatcher
    where
        F: Fn(&ParsedCommand) -> Result<CommandOutcome, CommandError> + Send + Sync + 'static,
    {
        CommandDispatcher::new(Arc::new(CommandCatalog::builtin()), gateway)
    }

    #[tokio::test]
    async fn successful_command_reports_success() {
        let gateway = Arc::new(FnGateway::new(|_| {
            Ok(CommandOutcome::Success {
                result: json!({"sent": true}),
            })
        }));
        let dispatcher = dispatcher_with(gateway);
        let command = ParsedCommand::new("email-mcp", "send_test_email")
            .with_arg("subject", "hi")
            .with_arg("body", "hello world");
        let report = dispatcher.dispatch(command, Some("token")).await;
        assert!(matches!(report.outcome, DispatchOutcome::Success { .. }));
        assert!(!report.discovery_attempted);
        assert!(report.error_class().is_none());
    }

    #[tokio::test]
    async fn unknown_server_is_a_command_execution_failure() {
        let gateway = Arc::new(FnGateway::new(|_| {
            Ok(CommandOutcome::Success { result: json!({}) })
        }));
        let dispatcher = dispatcher_with(gateway.clone());
        let report = dispatcher
            .dispatch(ParsedCommand::new("nonexistent", "anything"), None)
            .await;
        assert_eq!(report.error_class(), Some(ErrorClass::CommandExecution));
        assert!(report.summary().contains("nonexistent"));
        // Never reached the gateway.
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn auth_required_without_bearer_token() {
        let gateway = Arc::new(FnGateway::new(|_| {
            Ok(CommandOutcome::Success { result: json!({}) })
        }));
        let dispatcher = dispatcher_with(gateway.clone());
        let command = ParsedCommand::new("email-mcp", "send_test_email")
            .with_arg("subject", "hi")
            .with_arg("body", "b");
        let report = dispatcher.dispatch(command, None).await;
        assert_eq!(
            report.error_class(),
            Some(ErrorClass::AuthenticationRequired)
        );
        assert!(report.summary().contains("email-mcp"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn gateway_timeout_classifies_as_upstream_timeout() {
        struct HangingGateway;
        #[async_trait]
        impl CommandGateway for HangingGateway {
            async fn execute(
                &self,
                _invocation: &CommandInvocation,
            ) -> Result<CommandOutcome, CommandError> {
                std::future::pending().await
            }
        }
        let dispatcher = CommandDispatcher::new(
            Arc::new(CommandCatalog::builtin()),
            Arc::new(HangingGateway),
        )
        .with_config(DispatcherConfig {
            command_timeout: Duration::from_millis(20),
            ..DispatcherConfig::default()
        });
        let report = dispatcher
            .dispatch(ParsedCommand::new("web", "search").with_arg("query", "x"), None)
            .await;
        assert_eq!(report.error_class(), Some(ErrorClass::UpstreamTimeout));
        assert!(report.summary().contains("took too long"));
    }

    /// Full recovery flow: the original lookup misses, one discovery
    /// search runs (exactly one navigate), candidates come back from the
    /// snapshot, and a retry succeeds.
    #[tokio::test]
    async fn lookup_miss_runs_one_discovery_and_retries() {
        let gateway = Arc::new(FnGateway::new(|cmd: &ParsedCommand| {
            match (cmd.server_id.as_str(), cmd.command.as_str()) {
                ("tickets", "find_event") => match cmd.arg("event_id") {
                    Some("super-bowl-2026") => Ok(CommandOutcome::Success {
                        result: json!({"event": "super-bowl-2026", "tickets": 4}),
                    }),
                    _ => Ok(CommandOutcome::NotFound {
                        message: "no such event".to_string(),
                    }),
                },
                ("browser", "navigate") => {
                    assert!(cmd.arg("url").unwrap().contains("super%20bowl%20lix"));
                    Ok(CommandOutcome::Success { result: json!({}) })
                }
                ("browser", "wait") => Ok(CommandOutcome::Success { result: json!({}) }),
                ("browser", "snapshot") => Ok(CommandOutcome::Success {
                    result: json!(
                        "<a href=\"/events/super-bowl-lix\">old</a> \
                         <a href=\"/events/halftime-show\">half</a> \
                         <a href=\"/events/super-bowl-2026\">new</a> \
                         <a href=\"/events/halftime-show\">dup</a>"
                    ),
                }),
                other => panic!("unexpected command: {other:?}"),
            }
        }));
        let dispatcher = dispatcher_with(gateway.clone());

        let command =
            ParsedCommand::new("tickets", "find_event").with_arg("event_id", "super-bowl-lix");
        let report = dispatcher.dispatch(command, None).await;

        assert!(report.discovery_attempted);
        assert!(matches!(report.outcome, DispatchOutcome::Success { .. }));
        // The original id is excluded; duplicates collapse.
        assert_eq!(
            report.candidates_tried,
            vec!["halftime-show".to_string(), "super-bowl-2026".to_string()]
        );

        let calls = gateway.calls();
        let navigates = calls
            .iter()
            .filter(|c| c.server_id == "browser" && c.command == "navigate")
            .count();
        assert_eq!(navigates, 1, "exactly one discovery search");
    }

    #[tokio::test]
    async fn all_candidates_missing_reports_no_match_without_second_search() {
        let gateway = Arc::new(FnGateway::new(|cmd: &ParsedCommand| {
            match (cmd.server_id.as_str(), cmd.command.as_str()) {
                ("tickets", "find_event") => Ok(CommandOutcome::NotFound {
                    message: "no such event".to_string(),
                }),
                ("browser", _) => Ok(CommandOutcome::Success {
                    result: json!("/events/alpha /events/beta"),
                }),
                other => panic!("unexpected command: {other:?}"),
            }
        }));
        let dispatcher = dispatcher_with(gateway.clone());

        let command =
            ParsedCommand::new("tickets", "find_event").with_arg("event_id", "super-bowl-lix");
        let report = dispatcher.dispatch(command, None).await;

        assert!(report.discovery_attempted);
        match &report.outcome {
            DispatchOutcome::NoMatch { message } => {
                assert!(message.contains("No match found"), "message: {message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.candidates_tried.len(), 2);

        let navigates = gateway
            .calls()
            .iter()
            .filter(|c| c.server_id == "browser" && c.command == "navigate")
            .count();
        assert_eq!(navigates, 1, "a failed recovery must not search again");
    }

    #[tokio::test]
    async fn non_lookup_miss_skips_discovery() {
        let gateway = Arc::new(FnGateway::new(|_| {
            Ok(CommandOutcome::NotFound {
                message: "nothing stored".to_string(),
            })
        }));
        let dispatcher = dispatcher_with(gateway.clone());
        let report = dispatcher
            .dispatch(
                ParsedCommand::new("memory", "recall").with_arg("query", "x"),
                None,
            )
            .await;
        assert!(!report.discovery_attempted);
        assert!(matches!(report.outcome, DispatchOutcome::NoMatch { .. }));
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn discovery_navigate_failure_degrades_to_no_match() {
        let gateway = Arc::new(FnGateway::new(|cmd: &ParsedCommand| {
            match (cmd.server_id.as_str(), cmd.command.as_str()) {
                ("tickets", "find_event") => Ok(CommandOutcome::NotFound {
                    message: "no such event".to_string(),
                }),
                ("browser", "navigate") => Err(CommandError::Transport {
                    message: "connection refused".to_string(),
                }),
                other => panic!("unexpected command: {other:?}"),
            }
        }));
        let dispatcher = dispatcher_with(gateway);
        let report = dispatcher
            .dispatch(
                ParsedCommand::new("tickets", "find_event").with_arg("event_id", "x-1"),
                None,
            )
            .await;
        assert!(report.discovery_attempted);
        assert!(report.candidates_tried.is_empty());
        match &report.outcome {
            DispatchOutcome::NoMatch { message } => {
                assert!(message.contains("turned up nothing"), "message: {message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn execution_failure_becomes_readable_message_not_err() {
        let gateway = Arc::new(FnGateway::new(|cmd: &ParsedCommand| {
            Err(CommandError::ExecutionFailed {
                server_id: cmd.server_id.clone(),
                command: cmd.command.clone(),
                message: "smtp relay down".to_string(),
            })
        }));
        let dispatcher = dispatcher_with(gateway);
        let command = ParsedCommand::new("email-mcp", "send_test_email")
            .with_arg("subject", "s")
            .with_arg("body", "b");
        let report = dispatcher.dispatch(command, Some("token")).await;
        assert_eq!(report.error_class(), Some(ErrorClass::CommandExecution));
        assert!(report.summary().contains("could not be completed"));
    }
}
