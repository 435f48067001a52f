//! Line-oriented front end for per-chat agents.
//!
//! Run with: `CLAUDE_CODE_OAUTH_TOKEN=... cargo run -p chat-agents-cli -- [chats-root]`
//!
//! Each stdin line is `<chat-id> <message>`. `<chat-id> /new` forgets the
//! chat's conversation. Lines for one chat are handled in input order;
//! different chats run concurrently. Chat archives live under
//! `chats-root/<chat-id>/` (default `$CHATS_ROOT`, else `./chats`).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chat_agents_core::{AgentBackend, AgentConfig, ContextId, SessionConfig, StatusUpdate};
use chat_agents_executor::ClaudeBackend;
use chat_agents_session::ChatAgent;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_stream::{StreamExt, wrappers::LinesStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CHATS_ROOT: &str = "chats";

/// How often idle sessions are swept.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// A chat's worker exits after this long without input.
const WORKER_IDLE: Duration = Duration::from_secs(300);

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Ask { context_id: ContextId, message: &'a str },
    Reset { context_id: ContextId },
}

impl Command<'_> {
    const fn context_id(&self) -> ContextId {
        match self {
            Self::Ask { context_id, .. } | Self::Reset { context_id } => *context_id,
        }
    }

    fn into_job(self) -> Job {
        match self {
            Self::Ask { message, .. } => Job::Ask(message.to_string()),
            Self::Reset { .. } => Job::Reset,
        }
    }
}

/// Work queued for one chat.
#[derive(Debug, PartialEq, Eq)]
enum Job {
    Ask(String),
    Reset,
}


fn parse_line(line: &str) -> Result<Command<'_>, String> {
    let line = line.trim();
    let (id, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let context_id = id
        .parse::<ContextId>()
        .map_err(|_| format!("expected `<chat-id> <message>`, got {line:?}"))?;
    let message = rest.trim();
    match message {
        "" => Err(format!("empty message for chat {context_id}")),
        "/new" => Ok(Command::Reset { context_id }),
        _ => Ok(Command::Ask { context_id, message }),
    }
}

fn chats_root() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("CHATS_ROOT"))
        .map_or_else(|| PathBuf::from(DEFAULT_CHATS_ROOT), PathBuf::from)
}

async fn answer<B: AgentBackend>(agent: &ChatAgent<B>, root: &Path, context_id: ContextId, message: &str) {
    let config = SessionConfig::for_chat(root, context_id);
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusUpdate>();
    let printer = tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            println!("[{context_id}] {status}");
        }
    });

    let outcome = agent.query(context_id, message, &config, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    match outcome {
        Ok(text) => println!("[{context_id}] >> {text}"),
        Err(e) => println!("[{context_id}] !! {e}"),
    }
}

async fn run_job<B: AgentBackend>(agent: &ChatAgent<B>, root: &Path, context_id: ContextId, job: Job) {
    match job {
        Job::Ask(message) => answer(agent, root, context_id, &message).await,
        Job::Reset => {
            let had_session = agent.reset(context_id).await;
            println!("[{context_id}] conversation reset (had session: {had_session})");
        }
    }
}

/// Run one chat's jobs in order.
///
/// Starts once `previous` (the chat's earlier worker) has finished. Exits
/// when the queue closes, or after staying idle, in which case the queue is
/// closed and anything already in it is still run.
async fn chat_worker<B: AgentBackend>(
    agent: Arc<ChatAgent<B>>,
    root: Arc<PathBuf>,
    context_id: ContextId,
    previous: Option<JoinHandle<()>>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    loop {
        match tokio::time::timeout(WORKER_IDLE, jobs.recv()).await {
            Ok(Some(job)) => run_job(&agent, &root, context_id, job).await,
            Ok(None) => break,
            Err(_) => {
                jobs.close();
                while let Ok(job) = jobs.try_recv() {
                    run_job(&agent, &root, context_id, job).await;
                }
                break;
            }
        }
    }
    tracing::debug!(context_id, "Chat worker finished");
}

struct Queue {
    jobs: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

/// Per-chat job queues, each drained by its own worker task.
struct Dispatcher<B: AgentBackend> {
    agent: Arc<ChatAgent<B>>,
    root: Arc<PathBuf>,
    queues: HashMap<ContextId, Queue>,
}

impl<B: AgentBackend + 'static> Dispatcher<B> {
    fn new(agent: Arc<ChatAgent<B>>, root: Arc<PathBuf>) -> Self {
        Self {
            agent,
            root,
            queues: HashMap::new(),
        }
    }

    fn submit(&mut self, context_id: ContextId, job: Job) {
        self.queues
            .retain(|_, queue| !(queue.jobs.is_closed() && queue.worker.is_finished()));

        let (job, previous) = match self.queues.remove(&context_id) {
            Some(queue) => match queue.jobs.send(job) {
                Ok(()) => {
                    self.queues.insert(context_id, queue);
                    return;
                }
                Err(mpsc::error::SendError(job)) => (job, Some(queue.worker)),
            },
            None => (job, None),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        let worker = tokio::spawn(chat_worker(
            Arc::clone(&self.agent),
            Arc::clone(&self.root),
            context_id,
            previous,
            rx,
        ));
        self.queues.insert(context_id, Queue { jobs: tx, worker });
    }

    /// Close every queue and wait for the queued work to finish.
    async fn finish(self) {
        let workers: Vec<JoinHandle<()>> =
            self.queues.into_values().map(|queue| queue.worker).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AgentConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        token = %config.redacted_token(),
        model = %config.model,
        timeout_secs = config.session_timeout.as_secs(),
        "Configuration loaded"
    );

    let root = Arc::new(chats_root());
    tracing::info!("Chat archives under {}", root.display());

    let agent = Arc::new(ChatAgent::new(ClaudeBackend::new(&config), &config));

    let sweeper = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_INTERVAL);
            loop {
                interval.tick().await;
                let evicted = agent.registry().evict_idle().await;
                if evicted > 0 {
                    tracing::info!("[SESSION] Evicted {evicted} idle sessions");
                }
            }
        })
    };

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut dispatcher = Dispatcher::new(Arc::clone(&agent), root);

    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line) {
            Ok(command) => dispatcher.submit(command.context_id(), command.into_job()),
            Err(e) => tracing::warn!("{e}"),
        }
    }

    dispatcher.finish().await;
    sweeper.abort();
    agent.shutdown().await;

    Ok(())
}
