//! Claude Code agent client: turns CLI output into content events.

use std::sync::Arc;

use chat_agents_core::{ContentEvent, DispatchError, ResultSummary, ToolInvocation};
use serde_json::Value;
use tokio::sync::mpsc;

use super::types::{AssistantMessage, ContentBlock, PermissionResult, ResultMessage};
use crate::approvals::ToolPolicy;

/// Channel the reader task feeds a session's events into.
pub type EventSender = mpsc::UnboundedSender<Result<ContentEvent, DispatchError>>;

/// Receiving half of [`EventSender`].
pub type EventReceiver = mpsc::UnboundedReceiver<Result<ContentEvent, DispatchError>>;

/// Claude agent client with control protocol support.
pub struct ClaudeClient {
    events: EventSender,
    policy: ToolPolicy,
}

impl ClaudeClient {
    /// Create a new client forwarding events into `events`.
    #[must_use]
    pub fn new(events: EventSender, policy: ToolPolicy) -> Arc<Self> {
        Arc::new(Self { events, policy })
    }

    /// Handle `can_use_tool` request.
    pub(crate) fn on_can_use_tool(
        &self,
        tool_name: &str,
        input: Value,
        tool_use_id: Option<&str>,
    ) -> PermissionResult {
        let result = self.policy.decide(tool_name, input);
        if let PermissionResult::Deny { message, .. } = &result {
            tracing::warn!(tool = tool_name, tool_use_id, "Denied tool use: {message}");
        }
        result
    }

    /// Handle hook callback.
    pub(crate) fn on_hook_callback(&self, callback_id: &str, tool_use_id: Option<&str>) -> Value {
        tracing::debug!(callback_id, tool_use_id, "Hook callback, allowing");
        serde_json::json!({
            "hookSpecificOutput": {
                "hookEventName": "PreToolUse",
                "permissionDecision": "allow",
                "permissionDecisionReason": "Auto-approved"
            }
        })
    }

    /// Handle a complete assistant message.
    pub(crate) fn on_assistant(&self, message: AssistantMessage) {
        for event in translate_assistant(message) {
            self.forward(Ok(event));
        }
    }

    /// Handle the final result of a turn.
    pub(crate) fn on_result(&self, result: ResultMessage) {
        self.forward(Ok(ContentEvent::ResultSummary(ResultSummary::from(result))));
    }

    /// Handle a read failure on the CLI's stdout.
    pub(crate) fn on_read_error(&self, error: std::io::Error) {
        self.forward(Err(DispatchError::Io(error)));
    }

    fn forward(&self, event: Result<ContentEvent, DispatchError>) {
        // The receiver only goes away with the session itself.
        if self.events.send(event).is_err() {
            tracing::debug!("Event receiver dropped, discarding event");
        }
    }
}

/// Content events carried by one assistant message, in block order.
#[must_use]
pub fn translate_assistant(message: AssistantMessage) -> Vec<ContentEvent> {
    message
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ContentEvent::TextSegment { text }),
            ContentBlock::ToolUse { name, input, .. } => {
                Some(ContentEvent::ToolInvocation(ToolInvocation::new(name, input)))
            }
            ContentBlock::Thinking {} | ContentBlock::Unknown => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::claude::types::CLIMessage;

    fn assistant(json: &str) -> AssistantMessage {
        match serde_json::from_str::<CLIMessage>(json).unwrap() {
            CLIMessage::Assistant { message } => message,
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_translate_keeps_block_order() {
        let message = assistant(
            r#"{"type":"assistant","message":{"content":[
                {"type":"thinking","thinking":"..."},
                {"type":"tool_use","id":"t1","name":"Glob","input":{"pattern":"*.csv"}},
                {"type":"text","text":"Found them"}
            ]}}"#,
        );

        let events = translate_assistant(message);
        assert_eq!(
            events,
            vec![
                ContentEvent::tool("Glob", json!({"pattern": "*.csv"})),
                ContentEvent::text("Found them"),
            ]
        );
    }

    #[tokio::test]
    async fn test_client_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = ClaudeClient::new(tx, ToolPolicy::new(["Read"]));

        client.on_assistant(assistant(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}"#,
        ));
        let CLIMessage::Result(result) = serde_json::from_str::<CLIMessage>(
            r#"{"type":"result","usage":{"input_tokens":1,"output_tokens":2}}"#,
        )
        .unwrap() else {
            panic!("Wrong message type");
        };
        client.on_result(result);

        assert_eq!(rx.recv().await.unwrap().unwrap(), ContentEvent::text("hi"));
        let last = rx.recv().await.unwrap().unwrap();
        assert!(matches!(last, ContentEvent::ResultSummary(ref s) if s.usage.total() == 3));
    }

    #[test]
    fn test_can_use_tool_follows_policy() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ClaudeClient::new(tx, ToolPolicy::new(["Bash"]));

        assert!(matches!(
            client.on_can_use_tool("Bash", json!({"command": "ls"}), Some("t1")),
            PermissionResult::Allow { .. }
        ));
        assert!(matches!(
            client.on_can_use_tool("WebFetch", json!({}), None),
            PermissionResult::Deny { .. }
        ));
    }
}
