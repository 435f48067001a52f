//! Claude Code control protocol handler.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, oneshot},
};

use super::client::ClaudeClient;
use super::types::{
    CLIMessage, ControlRequestType, ControlResponseType, SDKControlRequestType, SDKMessage,
};

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Agent input already closed")]
    InputClosed,
    #[error("Control request {0} got no response")]
    NoResponse(String),
    #[error("Control request {0} timed out")]
    Timeout(String),
    #[error("Control request rejected: {0}")]
    Rejected(String),
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<ControlResponseType>>>>;

/// Handles bidirectional control protocol communication.
#[derive(Clone)]
pub struct ProtocolPeer {
    stdin: Arc<Mutex<Option<Writer>>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_request: Arc<AtomicU64>,
}

impl ProtocolPeer {
    /// Spawn a new protocol peer.
    ///
    /// This starts a background task reading `stdout` line by line, answering
    /// control requests and feeding content into `client`.
    #[must_use]
    pub fn spawn<W, R>(stdin: W, stdout: R, client: Arc<ClaudeClient>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let peer = Self {
            stdin: Arc::new(Mutex::new(Some(Box::new(stdin)))),
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            next_request: Arc::new(AtomicU64::new(1)),
        };

        let reader_peer = peer.clone();
        tokio::spawn(async move {
            reader_peer.read_loop(stdout, client).await;
        });

        peer
    }

    async fn read_loop<R>(&self, mut reader: R, client: Arc<ClaudeClient>)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buffer = String::new();

        loop {
            buffer.clear();
            match reader.read_line(&mut buffer).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let line = buffer.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CLIMessage>(line) {
                        Ok(CLIMessage::ControlRequest { request_id, request }) => {
                            self.handle_control_request(&client, request_id, request)
                                .await;
                        }
                        Ok(CLIMessage::ControlResponse { response }) => {
                            self.resolve_pending(response).await;
                        }
                        Ok(CLIMessage::Assistant { message }) => client.on_assistant(message),
                        Ok(CLIMessage::Result(result)) => client.on_result(result),
                        Ok(CLIMessage::System { subtype, session_id }) => {
                            tracing::debug!(?subtype, ?session_id, "System message");
                        }
                        Ok(CLIMessage::User {} | CLIMessage::StreamEvent {}) => {}
                        Ok(CLIMessage::Unknown) => {
                            tracing::debug!("Ignoring unknown message: {line}");
                        }
                        Err(e) => {
                            tracing::warn!("Skipping malformed line from agent: {e}");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Error reading stdout: {}", e);
                    client.on_read_error(e);
                    break;
                }
            }
        }

        // Wake anyone still waiting on a control response.
        let mut pending = self.pending.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
        drop(pending);
        tracing::debug!("Protocol reader loop finished");
    }

    async fn handle_control_request(
        &self,
        client: &Arc<ClaudeClient>,
        request_id: String,
        request: ControlRequestType,
    ) {
        let outcome = match request {
            ControlRequestType::CanUseTool {
                tool_name,
                input,
                tool_use_id,
                ..
            } => {
                let result = client.on_can_use_tool(&tool_name, input, tool_use_id.as_deref());
                match serde_json::to_value(result) {
                    Ok(value) => self.send_control_success(request_id, value).await,
                    Err(e) => self.send_control_error(request_id, e.to_string()).await,
                }
            }
            ControlRequestType::HookCallback {
                callback_id,
                tool_use_id,
                ..
            } => {
                let output = client.on_hook_callback(&callback_id, tool_use_id.as_deref());
                self.send_control_success(request_id, output).await
            }
            ControlRequestType::Unsupported => {
                self.send_control_error(request_id, "Unsupported control request".to_string())
                    .await
            }
        };

        if let Err(e) = outcome {
            tracing::error!("Failed to answer control request: {e}");
        }
    }

    async fn resolve_pending(&self, response: ControlResponseType) {
        let waiter = self.pending.lock().await.remove(response.request_id());
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(
                "Control response for unknown request {}",
                response.request_id()
            ),
        }
    }

    async fn send_control_success(
        &self,
        request_id: String,
        response: serde_json::Value,
    ) -> Result<(), ProtocolError> {
        self.send_json(&SDKMessage::ControlResponse {
            response: ControlResponseType::Success {
                request_id,
                response: Some(response),
            },
        })
        .await
    }

    async fn send_control_error(
        &self,
        request_id: String,
        error: String,
    ) -> Result<(), ProtocolError> {
        self.send_json(&SDKMessage::ControlResponse {
            response: ControlResponseType::Error {
                request_id,
                error: Some(error),
            },
        })
        .await
    }

    async fn send_json<T: serde::Serialize>(&self, message: &T) -> Result<(), ProtocolError> {
        let json = serde_json::to_string(message)?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ProtocolError::InputClosed)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a control request and wait for its response.
    async fn request(
        &self,
        request: SDKControlRequestType,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>, ProtocolError> {
        let seq = self.next_request.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let request_id = format!("req_{seq}_{}", &suffix[..8]);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(ProtocolError::NoResponse(request_id));
            }
            pending.insert(request_id.clone(), tx);
        }

        if let Err(e) = self
            .send_json(&SDKMessage::ControlRequest {
                request_id: request_id.clone(),
                request,
            })
            .await
        {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ControlResponseType::Success { response, .. })) => Ok(response),
            Ok(Ok(ControlResponseType::Error { error, .. })) => Err(ProtocolError::Rejected(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Ok(Err(_)) => Err(ProtocolError::NoResponse(request_id)),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ProtocolError::Timeout(request_id))
            }
        }
    }

    /// Send a user message.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn send_user_message(&self, content: String) -> Result<(), ProtocolError> {
        self.send_json(&SDKMessage::new_user(content)).await
    }

    /// Initialize the protocol and wait for the agent to acknowledge.
    ///
    /// # Errors
    /// Returns error if the write fails or no acknowledgement arrives in time.
    pub async fn initialize(
        &self,
        hooks: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        self.request(SDKControlRequestType::Initialize { hooks }, timeout)
            .await
            .map(|_| ())
    }

    /// Close the agent's stdin. Further sends fail with `InputClosed`.
    pub async fn close_input(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!("Failed to shut down agent stdin: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chat_agents_core::ContentEvent;
    use serde_json::{Value, json};
    use tokio::io::{BufReader, duplex};
    use tokio::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::approvals::ToolPolicy;

    struct Harness {
        peer: ProtocolPeer,
        /// What the peer wrote (the agent's stdin).
        agent_in: tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
        /// Where the fake agent writes (the agent's stdout).
        agent_out: tokio::io::DuplexStream,
        events: crate::claude::client::EventReceiver,
    }

    fn harness(policy: ToolPolicy) -> Harness {
        let (stdin_w, stdin_r) = duplex(64 * 1024);
        let (stdout_w, stdout_r) = duplex(64 * 1024);
        let (tx, events) = mpsc::unbounded_channel();
        let peer = ProtocolPeer::spawn(stdin_w, BufReader::new(stdout_r), ClaudeClient::new(tx, policy));
        Harness {
            peer,
            agent_in: BufReader::new(stdin_r).lines(),
            agent_out: stdout_w,
            events,
        }
    }

    async fn agent_says(h: &mut Harness, line: &str) {
        h.agent_out.write_all(line.as_bytes()).await.unwrap();
        h.agent_out.write_all(b"\n").await.unwrap();
    }

    async fn next_written(h: &mut Harness) -> Value {
        let line = h.agent_in.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let mut h = harness(ToolPolicy::default());
        let peer = h.peer.clone();
        let init = tokio::spawn(async move { peer.initialize(None, Duration::from_secs(5)).await });

        let sent = next_written(&mut h).await;
        assert_eq!(sent["request"]["subtype"], "initialize");
        let request_id = sent["request_id"].as_str().unwrap().to_string();

        let ack = json!({
            "type": "control_response",
            "response": {"subtype": "success", "request_id": request_id, "response": {}}
        });
        agent_says(&mut h, &ack.to_string()).await;

        assert_ok!(init.await.unwrap());
    }

    #[tokio::test]
    async fn test_initialize_fails_when_agent_exits() {
        let h = harness(ToolPolicy::default());
        let peer = h.peer.clone();
        drop(h.agent_out);

        let err = assert_err!(peer.initialize(None, Duration::from_secs(5)).await);
        assert!(matches!(err, ProtocolError::NoResponse(_) | ProtocolError::Io(_)));
    }

    #[tokio::test]
    async fn test_answers_can_use_tool() {
        let mut h = harness(ToolPolicy::new(["Read"]));
        agent_says(
            &mut h,
            r#"{"type":"control_request","request_id":"cli_1","request":{"subtype":"can_use_tool","tool_name":"Write","input":{}}}"#,
        )
        .await;

        let sent = next_written(&mut h).await;
        assert_eq!(sent["type"], "control_response");
        assert_eq!(sent["response"]["request_id"], "cli_1");
        assert_eq!(sent["response"]["response"]["behavior"], "deny");
    }

    #[tokio::test]
    async fn test_forwards_content_and_skips_noise() {
        let mut h = harness(ToolPolicy::default());
        agent_says(&mut h, r#"{"type":"system","subtype":"init","session_id":"s"}"#).await;
        agent_says(&mut h, "not json at all").await;
        agent_says(&mut h, r#"{"type":"stream_event","event":{}}"#).await;
        agent_says(
            &mut h,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"ok"}]}}"#,
        )
        .await;
        agent_says(&mut h, r#"{"type":"result","total_cost_usd":0.5,"usage":null}"#).await;

        assert_eq!(h.events.recv().await.unwrap().unwrap(), ContentEvent::text("ok"));
        assert!(h.events.recv().await.unwrap().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let mut h = harness(ToolPolicy::default());
        h.peer.send_user_message("first".to_string()).await.unwrap();
        let sent = next_written(&mut h).await;
        assert_eq!(sent["message"]["content"], "first");

        h.peer.close_input().await;
        assert!(matches!(
            h.peer.send_user_message("second".to_string()).await,
            Err(ProtocolError::InputClosed)
        ));
    }
}
