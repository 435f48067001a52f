//! Events produced by a backend session while answering one query.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One item of a query's event sequence.
///
/// A sequence always ends with exactly one [`ContentEvent::ResultSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    /// Assistant text.
    TextSegment { text: String },
    /// The agent invoked a tool.
    ToolInvocation(ToolInvocation),
    /// Terminal accounting record.
    ResultSummary(ResultSummary),
}

impl ContentEvent {
    /// Shorthand for a text segment.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextSegment { text: text.into() }
    }

    /// Shorthand for a tool invocation.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, parameters: Value) -> Self {
        Self::ToolInvocation(ToolInvocation::new(tool_name, parameters))
    }

    /// Whether this event ends the sequence.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ResultSummary(_))
    }
}

/// Tools the status renderer knows how to describe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Shell command execution.
    Bash,
    /// File read.
    Read,
    /// Pattern search over file contents.
    Grep,
    /// File name globbing.
    Glob,
    /// Anything else, by raw name.
    Other(String),
}

impl ToolKind {
    /// Classify a tool by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "Bash" => Self::Bash,
            "Read" => Self::Read,
            "Grep" => Self::Grep,
            "Glob" => Self::Glob,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of the tool.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Bash => "Bash",
            Self::Read => "Read",
            Self::Grep => "Grep",
            Self::Glob => "Glob",
            Self::Other(name) => name,
        }
    }
}

/// A single tool call issued by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ToolInvocation {
    /// Create a new invocation record.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }

    /// Tool identity.
    #[must_use]
    pub fn kind(&self) -> ToolKind {
        ToolKind::from_name(&self.tool_name)
    }

    /// String parameter by key, if present and a string.
    #[must_use]
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Token accounting for one query.
///
/// Deserialization accepts whatever the backend hands over: a missing,
/// `null` or non-object record reads as all zeros, as do missing or
/// non-numeric fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record from input/output counts.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    /// Read a usage record out of an arbitrary JSON value.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let count = |key: &str| value.get(key).and_then(Value::as_u64).unwrap_or(0);
        Self {
            input_tokens: count("input_tokens"),
            output_tokens: count("output_tokens"),
            cache_creation_input_tokens: count("cache_creation_input_tokens"),
            cache_read_input_tokens: count("cache_read_input_tokens"),
        }
    }

    /// Input plus output tokens.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl<'de> Deserialize<'de> for TokenUsage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().map(Self::from_value).unwrap_or_default())
    }
}

/// Terminal record of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A rendered progress line destined for the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate(pub String);

impl StatusUpdate {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for StatusUpdate {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl std::fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
