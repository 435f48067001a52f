//! Stream-json wire types exchanged with the Claude Code CLI.

use chat_agents_core::{ResultSummary, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A line printed by the CLI on stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CLIMessage {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
    },
    User {},
    Result(ResultMessage),
    /// Partial message deltas (`--include-partial-messages`).
    StreamEvent {},
    ControlRequest {
        request_id: String,
        request: ControlRequestType,
    },
    ControlResponse {
        response: ControlResponseType,
    },
    #[serde(other)]
    Unknown,
}

/// Complete assistant turn.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: Option<String>,
}

/// A block of assistant content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {},
    #[serde(other)]
    Unknown,
}

/// Final message of a turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl From<ResultMessage> for ResultSummary {
    fn from(msg: ResultMessage) -> Self {
        Self {
            usage: msg.usage,
            total_cost_usd: msg.total_cost_usd.unwrap_or(0.0),
            num_turns: msg.num_turns,
            duration_ms: msg.duration_ms,
            is_error: msg.is_error,
            session_id: msg.session_id,
        }
    }
}

/// Control request issued by the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestType {
    CanUseTool {
        tool_name: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        permission_suggestions: Option<Value>,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    HookCallback {
        callback_id: String,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

/// Control request sent to the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SDKControlRequestType {
    Initialize { hooks: Option<Value> },
}

/// Response to a control request, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponseType {
    Success {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    Error {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ControlResponseType {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }
}

/// Body of a user turn.
#[derive(Debug, Clone, Serialize)]
pub struct UserContent {
    pub role: &'static str,
    pub content: String,
}

/// A line written to the CLI on stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SDKMessage {
    User {
        message: UserContent,
        parent_tool_use_id: Option<String>,
        session_id: String,
    },
    ControlRequest {
        request_id: String,
        request: SDKControlRequestType,
    },
    ControlResponse {
        response: ControlResponseType,
    },
}

impl SDKMessage {
    /// User turn with plain text content.
    #[must_use]
    pub fn new_user(content: String) -> Self {
        Self::User {
            message: UserContent {
                role: "user",
                content,
            },
            parent_tool_use_id: None,
            session_id: "default".to_string(),
        }
    }
}

/// Answer to a `can_use_tool` request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionResult {
    Allow {
        #[serde(rename = "updatedInput")]
        updated_input: Value,
    },
    Deny {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt: Option<bool>,
    },
}
