//! Long-lived Claude Code CLI sessions.

use std::{process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use chat_agents_core::{
    AgentBackend, AgentConfig, AgentSession, DispatchError, EventStream, HandleId,
    SessionConstructionError, SessionOptions, TeardownError,
};
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::{Mutex, OwnedMutexGuard, mpsc},
};

use super::{
    client::{ClaudeClient, EventReceiver},
    protocol::{ProtocolError, ProtocolPeer},
};
use crate::{
    approvals::ToolPolicy,
    command::{CommandBuildError, CommandBuilder},
};

/// How long the CLI gets to acknowledge `initialize`.
const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `close` waits for a clean exit before killing the group.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Arguments that put the CLI into bidirectional stream-json mode.
const BASE_PARAMS: [&str; 7] = [
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
    "--verbose",
    "--permission-prompt-tool",
    "stdio",
];

/// Backend that runs one `claude` process per session.
#[derive(Clone)]
pub struct ClaudeBackend {
    command: CommandBuilder,
    oauth_token: String,
    init_timeout: Duration,
    close_grace: Duration,
}

impl ClaudeBackend {
    /// Create a backend launching `config.claude_bin`.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: CommandBuilder::new(config.claude_bin.clone()).params(BASE_PARAMS),
            oauth_token: config.oauth_token.clone(),
            init_timeout: INIT_TIMEOUT,
            close_grace: CLOSE_GRACE,
        }
    }

    /// Override the handshake timeout.
    #[must_use]
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Override the shutdown grace period.
    #[must_use]
    pub const fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    async fn spawn(
        &self,
        options: &SessionOptions,
    ) -> Result<(AsyncGroupChild, ProtocolPeer, EventReceiver), SessionConstructionError> {
        let (executable, args) = self
            .command
            .build(&session_args(options))
            .map_err(map_build_error)?
            .into_resolved()
            .await
            .map_err(map_build_error)?;

        tokio::fs::create_dir_all(&options.working_dir).await?;

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .current_dir(&options.working_dir)
            .env("CLAUDE_CODE_OAUTH_TOKEN", &self.oauth_token)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .group_spawn()
            .map_err(|e| SessionConstructionError::SpawnFailed(e.to_string()))?;

        let inner = child.inner();
        let (Some(stdin), Some(stdout), stderr) =
            (inner.stdin.take(), inner.stdout.take(), inner.stderr.take())
        else {
            let _ = child.kill().await;
            return Err(SessionConstructionError::SpawnFailed(
                "agent stdio pipes unavailable".to_string(),
            ));
        };

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "claude_stderr", "{line}");
                }
            });
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = ClaudeClient::new(
            events_tx,
            ToolPolicy::new(options.allowed_tools.iter().cloned()),
        );
        let peer = ProtocolPeer::spawn(stdin, BufReader::new(stdout), client);

        Ok((child, peer, events_rx))
    }
}

#[async_trait]
impl AgentBackend for ClaudeBackend {
    type Session = ClaudeSession;

    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Self::Session, SessionConstructionError> {
        let (mut child, peer, events) = self.spawn(options).await?;

        if let Err(e) = peer.initialize(None, self.init_timeout).await {
            peer.close_input().await;
            if let Err(kill_err) = child.kill().await {
                tracing::warn!("Failed to kill agent after handshake failure: {kill_err}");
            }
            return Err(SessionConstructionError::Handshake(e.to_string()));
        }

        let session = ClaudeSession {
            id: HandleId::new(),
            peer,
            events: Arc::new(Mutex::new(events)),
            child: Mutex::new(Some(child)),
            close_grace: self.close_grace,
        };
        tracing::debug!(handle = %session.id, "Agent process ready");
        Ok(session)
    }
}

/// A running `claude` process holding one conversation.
pub struct ClaudeSession {
    id: HandleId,
    peer: ProtocolPeer,
    events: Arc<Mutex<EventReceiver>>,
    child: Mutex<Option<AsyncGroupChild>>,
    close_grace: Duration,
}

#[async_trait]
impl AgentSession for ClaudeSession {
    fn id(&self) -> HandleId {
        self.id
    }

    async fn dispatch(&self, message: &str) -> Result<EventStream, DispatchError> {
        if self.child.lock().await.is_none() {
            return Err(DispatchError::SessionClosed);
        }

        let mut events = Arc::clone(&self.events).lock_owned().await;
        let stale = drain_stale(&mut events);
        if stale > 0 {
            tracing::debug!(handle = %self.id, stale, "Discarded events from an earlier turn");
        }

        self.peer
            .send_user_message(message.to_string())
            .await
            .map_err(|e| match e {
                ProtocolError::InputClosed => DispatchError::SessionClosed,
                other => DispatchError::Send(other.to_string()),
            })?;

        Ok(turn_stream(events))
    }

    async fn close(&self) -> Result<(), TeardownError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        self.peer.close_input().await;

        match tokio::time::timeout(self.close_grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(handle = %self.id, %status, "Agent process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TeardownError::Io(e)),
            Err(_) => {
                tracing::debug!(handle = %self.id, "Agent did not exit in time, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| TeardownError::Kill(e.to_string()))
            }
        }
    }
}

impl Drop for ClaudeSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.get_mut().as_mut() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Failed to kill abandoned agent process: {e}");
            }
        }
    }
}

/// Stream of one turn's events; ends after the result.
fn turn_stream(events: OwnedMutexGuard<EventReceiver>) -> EventStream {
    futures::stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        match events.recv().await {
            Some(Ok(event)) => {
                let next = if event.is_terminal() { None } else { Some(events) };
                Some((Ok(event), next))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None => Some((Err(DispatchError::StreamClosed), None)),
        }
    })
    .boxed()
}

fn drain_stale(events: &mut EventReceiver) -> usize {
    let mut count = 0;
    while events.try_recv().is_ok() {
        count += 1;
    }
    count
}

/// Per-session CLI arguments.
#[must_use]
pub fn session_args(options: &SessionOptions) -> Vec<String> {
    let mut args = vec![
        "--system-prompt".to_string(),
        options.system_prompt.clone(),
        "--allowedTools".to_string(),
        options.allowed_tools.join(","),
        "--model".to_string(),
        options.model.clone(),
    ];
    if options.include_partial_messages {
        args.push("--include-partial-messages".to_string());
    }
    args
}

fn map_build_error(error: CommandBuildError) -> SessionConstructionError {
    match error {
        CommandBuildError::ExecutableNotFound(program) => {
            SessionConstructionError::ExecutableNotFound(program)
        }
        other => SessionConstructionError::CommandBuild(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chat_agents_core::ContentEvent;

    use super::*;

    fn options() -> SessionOptions {
        SessionOptions {
            working_dir: PathBuf::from("/tmp/chat-agents-test"),
            system_prompt: "Be brief.".to_string(),
            allowed_tools: vec!["Read".to_string(), "Grep".to_string()],
            model: "sonnet".to_string(),
            include_partial_messages: true,
        }
    }

    #[test]
    fn test_session_args() {
        let args = session_args(&options());
        assert_eq!(
            args,
            vec![
                "--system-prompt",
                "Be brief.",
                "--allowedTools",
                "Read,Grep",
                "--model",
                "sonnet",
                "--include-partial-messages",
            ]
        );

        let mut opts = options();
        opts.include_partial_messages = false;
        assert!(!session_args(&opts).contains(&"--include-partial-messages".to_string()));
    }

    #[test]
    fn test_full_command_line() {
        let config = AgentConfig::new("token");
        let backend = ClaudeBackend::new(&config);
        let parts = backend.command.build(&session_args(&options())).unwrap();

        assert_eq!(parts.program, "claude");
        assert_eq!(&parts.args[..2], ["--output-format", "stream-json"]);
        assert!(parts.args.contains(&"--verbose".to_string()));
        assert_eq!(parts.args.last().map(String::as_str), Some("--include-partial-messages"));
    }

    #[tokio::test]
    async fn test_connect_missing_executable() {
        let mut config = AgentConfig::new("token");
        config.claude_bin = "/nonexistent/bin/claude".to_string();

        let result = ClaudeBackend::new(&config).connect(&options()).await;
        assert!(matches!(
            result,
            Err(SessionConstructionError::ExecutableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_turn_stream_stops_after_result() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Ok(ContentEvent::text("a"))).unwrap();
        tx.send(Ok(ContentEvent::ResultSummary(Default::default())))
            .unwrap();
        tx.send(Ok(ContentEvent::text("next turn"))).unwrap();

        let events = Arc::new(Mutex::new(rx));
        let guard = Arc::clone(&events).lock_owned().await;
        let collected: Vec<_> = turn_stream(guard).collect().await;
        assert_eq!(collected.len(), 2);

        // The lock is released once the stream is gone.
        let mut rx = events.lock().await;
        assert_eq!(rx.recv().await.unwrap().unwrap(), ContentEvent::text("next turn"));
    }

    #[tokio::test]
    async fn test_turn_stream_reports_eof() {
        let (tx, rx) = mpsc::unbounded_channel::<Result<ContentEvent, DispatchError>>();
        tx.send(Ok(ContentEvent::text("partial"))).unwrap();
        drop(tx);

        let guard = Arc::new(Mutex::new(rx)).lock_owned().await;
        let collected: Vec<_> = turn_stream(guard).collect().await;
        assert_eq!(collected.len(), 2);
        assert!(matches!(collected[1], Err(DispatchError::StreamClosed)));
    }

    #[test]
    fn test_drain_stale() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Ok(ContentEvent::text("old"))).unwrap();
        tx.send(Err(DispatchError::StreamClosed)).unwrap();
        assert_eq!(drain_stale(&mut rx), 2);
        assert_eq!(drain_stale(&mut rx), 0);
    }
}
