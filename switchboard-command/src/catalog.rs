//! Command catalog: the set of integrations the assistant can drive.
//!
//! Each entry describes one command on one external server, including the
//! parameters it takes, whether it needs a linked account, and how to run
//! a secondary discovery search when an identifier lookup misses. The
//! catalog is also the source for the flattened command reference given
//! to the model in direct-call mode and for synthesizing tool
//! definitions.

use serde_json::{json, Value};

// ============================================================================
// Entry types
// ============================================================================

/// One parameter a command accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub description: String,
}

/// How to find replacement identifiers when a lookup command reports that
/// an id does not exist: navigate to a search page, snapshot it, and pull
/// candidate ids out of the snapshot with a regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySpec {
    /// Search URL template with a `{query}` placeholder.
    pub search_url: String,
    /// Regex with one capture group that extracts candidate identifiers
    /// from a page snapshot.
    pub candidate_pattern: String,
    /// Argument of the original command that receives each candidate on
    /// retry.
    pub lookup_arg: String,
}

impl DiscoverySpec {
    pub fn new(
        search_url: impl Into<String>,
        candidate_pattern: impl Into<String>,
        lookup_arg: impl Into<String>,
    ) -> Self {
        Self {
            search_url: search_url.into(),
            candidate_pattern: candidate_pattern.into(),
            lookup_arg: lookup_arg.into(),
        }
    }
}

/// One command on one external integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub server_id: String,
    pub command: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub examples: Vec<String>,
    /// Command needs a linked account; callers without a bearer token are
    /// told how to connect instead of getting an opaque upstream error.
    pub requires_auth: bool,
    pub discovery: Option<DiscoverySpec>,
    /// Parameter that receives the main free-text payload when the
    /// command is synthesized from prose rather than typed explicitly.
    pub primary_param: Option<String>,
    /// Verbs in assistant prose that signal this command as a follow-up
    /// action ("email it to me" -> the send command).
    pub continuation_verbs: Vec<String>,
}

impl CatalogEntry {
    pub fn new(
        server_id: impl Into<String>,
        command: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            command: command.into(),
            description: description.into(),
            params: Vec::new(),
            examples: Vec::new(),
            requires_auth: false,
            discovery: None,
            primary_param: None,
            continuation_verbs: Vec::new(),
        }
    }

    pub fn with_param(
        mut self,
        name: impl Into<String>,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required,
            description: description.into(),
        });
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn with_auth_required(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoverySpec) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_primary_param(mut self, param: impl Into<String>) -> Self {
        self.primary_param = Some(param.into());
        self
    }

    pub fn with_continuation_verbs<I, S>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.continuation_verbs = verbs.into_iter().map(Into::into).collect();
        self
    }

    /// True when the command looks things up by identifier and can drive
    /// the discovery retry sequence after a miss.
    pub fn supports_lookup(&self) -> bool {
        self.discovery.is_some()
    }

    /// Stable tool name for model-facing tool definitions.
    pub fn tool_name(&self) -> String {
        format!("{}__{}", self.server_id, self.command)
    }

    /// Inverse of [`tool_name`](Self::tool_name).
    pub fn split_tool_name(name: &str) -> Option<(&str, &str)> {
        name.split_once("__")
    }

    /// JSON schema for the command's named parameters, in the shape both
    /// provider tool APIs accept.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                json!({ "type": "string", "description": param.description }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": Value::Array(required),
        })
    }

    /// One-line usage signature, e.g.
    /// `/email-mcp send_test_email subject=<subject> body=<body> [to=<to>]`.
    pub fn signature(&self) -> String {
        let mut out = format!("/{} {}", self.server_id, self.command);
        for param in &self.params {
            if param.required {
                out.push_str(&format!(" {}=<{}>", param.name, param.name));
            } else {
                out.push_str(&format!(" [{}=<{}>]", param.name, param.name));
            }
        }
        out
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone)]
pub struct CommandCatalog {
    entries: Vec<CatalogEntry>,
}

impl CommandCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Catalog with the built-in integrations registered.
    pub fn builtin() -> Self {
        Self::new(vec![
            CatalogEntry::new(
                "email-mcp",
                "send_test_email",
                "Send an email through the connected mail account.",
            )
            .with_param("subject", true, "Subject line of the email")
            .with_param("body", true, "Plain-text body of the email")
            .with_param("to", false, "Recipient address; defaults to the account owner")
            .with_auth_required()
            .with_primary_param("body")
            .with_continuation_verbs(["email", "send", "mail"])
            .with_example(r#"/email-mcp send_test_email subject="Weekly Report" body="hello world""#),
            CatalogEntry::new(
                "tickets",
                "find_event",
                "Look up a ticketed event by its identifier.",
            )
            .with_param("event_id", true, "Event identifier, e.g. super-bowl-lix")
            .with_discovery(DiscoverySpec::new(
                "https://tickets.example.com/search?q={query}",
                r"/events/([a-z0-9][a-z0-9-]*)",
                "event_id",
            ))
            .with_example("/tickets find_event event_id=super-bowl-lix"),
            CatalogEntry::new("browser", "navigate", "Open a URL in the headless browser.")
                .with_param("url", true, "Absolute URL to open"),
            CatalogEntry::new(
                "browser",
                "wait",
                "Wait for the current page to settle before reading it.",
            )
            .with_param("seconds", false, "Seconds to wait; defaults to 2"),
            CatalogEntry::new(
                "browser",
                "snapshot",
                "Capture the text content of the current page.",
            ),
            CatalogEntry::new("memory", "store", "Save a note to long-term memory.")
                .with_param("content", true, "Text to remember")
                .with_primary_param("content"),
            CatalogEntry::new("memory", "recall", "Search long-term memory.")
                .with_param("query", true, "What to look for")
                .with_primary_param("query"),
            CatalogEntry::new("web", "search", "Run a web search and return result snippets.")
                .with_param("query", true, "Search query")
                .with_primary_param("query"),
        ])
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn find(&self, server_id: &str, command: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.server_id == server_id && e.command == command)
    }

    pub fn server_exists(&self, server_id: &str) -> bool {
        self.entries.iter().any(|e| e.server_id == server_id)
    }

    pub fn find_by_tool_name(&self, tool_name: &str) -> Option<&CatalogEntry> {
        let (server_id, command) = CatalogEntry::split_tool_name(tool_name)?;
        self.find(server_id, command)
    }

    /// First entry whose continuation verbs appear as a whole word in the
    /// text. Word matching is ASCII case-insensitive.
    pub fn match_continuation(&self, text: &str) -> Option<&CatalogEntry> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_ascii_lowercase())
            .collect();
        self.entries.iter().find(|entry| {
            entry
                .continuation_verbs
                .iter()
                .any(|verb| words.iter().any(|w| w == verb))
        })
    }

    /// Flattened plain-text reference used in direct-call system prompts
    /// and for `/help` style output.
    pub fn render_reference(&self) -> String {
        let mut out = String::from("Available commands:\n");
        for entry in &self.entries {
            out.push_str(&format!("  {}\n", entry.signature()));
            out.push_str(&format!("      {}\n", entry.description));
            if entry.requires_auth {
                out.push_str("      (requires a linked account)\n");
            }
            if let Some(example) = entry.examples.first() {
                out.push_str(&format!("      example: {example}\n"));
            }
        }
        out
    }
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// Tests
// ============================================================================
