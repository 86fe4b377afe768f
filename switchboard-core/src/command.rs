//! Parsed slash-command shape

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One parsed slash command: `/serverId command key=value ...`.
///
/// Built once from a command string and never mutated. The dispatcher and
/// the recovery sequence derive new invocations by cloning and replacing
/// arguments, keeping the original intact for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// External integration the command addresses.
    pub server_id: String,
    /// Command name within that integration.
    pub command: String,
    /// Named arguments. Quoted values keep embedded whitespace verbatim.
    pub args: BTreeMap<String, String>,
    /// Bare tokens without a `key=` prefix, in input order.
    pub positional_args: Vec<String>,
}

impl ParsedCommand {
    /// Create a command with no arguments.
    pub fn new(server_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            command: command.into(),
            args: BTreeMap::new(),
            positional_args: Vec::new(),
        }
    }

    /// Add a named argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Add a positional argument.
    pub fn with_positional(mut self, value: impl Into<String>) -> Self {
        self.positional_args.push(value.into());
        self
    }

    /// Look up a named argument.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// All argument values in a stable order: named values first (sorted by
    /// key), then positionals in input order. Used when a lookup needs the
    /// human-entered text back out of the command.
    pub fn arg_values(&self) -> Vec<&str> {
        let mut values: Vec<&str> = self.args.values().map(String::as_str).collect();
        values.extend(self.positional_args.iter().map(String::as_str));
        values
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{} {}", self.server_id, self.command)?;
        for (key, value) in &self.args {
            if value.chars().any(char::is_whitespace) || value.is_empty() {
                write!(f, " {}=\"{}\"", key, value)?;
            } else {
                write!(f, " {}={}", key, value)?;
            }
        }
        for value in &self.positional_args {
            write!(f, " {}", value)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
