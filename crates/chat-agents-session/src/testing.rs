//! Scripted in-memory backend for tests.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chat_agents_core::{
    AgentBackend, AgentSession, ContentEvent, DispatchError, EventStream, HandleId,
    ResultSummary, SessionConstructionError, SessionOptions, TeardownError,
};
use futures::StreamExt;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Default)]
struct State {
    replies: VecDeque<Vec<Result<ContentEvent, DispatchError>>>,
    connected: Vec<(HandleId, SessionOptions)>,
    closes: HashMap<HandleId, usize>,
    fail_connects: usize,
    fail_dispatch: bool,
    fail_close: bool,
    close_delay: Duration,
    open: usize,
    max_open: usize,
}

/// Backend whose sessions replay queued event sequences.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<State>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the events answering the next dispatch (on any session).
    pub fn push_reply(&self, events: Vec<ContentEvent>) {
        let reply = events.into_iter().map(Ok).collect();
        self.state.lock().unwrap().replies.push_back(reply);
    }

    /// Queue a reply whose stream breaks after `events`.
    pub fn push_broken_reply(&self, events: Vec<ContentEvent>) {
        let mut reply: Vec<_> = events.into_iter().map(Ok).collect();
        reply.push(Err(DispatchError::StreamClosed));
        self.state.lock().unwrap().replies.push_back(reply);
    }

    /// Make the next `count` connects fail.
    pub fn fail_connects(&self, count: usize) {
        self.state.lock().unwrap().fail_connects = count;
    }

    pub fn fail_next_dispatch(&self) {
        self.state.lock().unwrap().fail_dispatch = true;
    }

    /// Make every close report an error (it still counts as a close).
    pub fn fail_closes(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    /// Make every close take `delay` before it completes.
    pub fn slow_closes(&self, delay: Duration) {
        self.state.lock().unwrap().close_delay = delay;
    }

    /// Most sessions that were open at the same time.
    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    /// Open a session without going through `connect`.
    pub fn open(&self) -> ScriptedSession {
        ScriptedSession {
            id: HandleId::new(),
            state: Arc::clone(&self.state),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connected.len()
    }

    pub fn connected_options(&self) -> Vec<SessionOptions> {
        let state = self.state.lock().unwrap();
        state.connected.iter().map(|(_, o)| o.clone()).collect()
    }

    /// How many times the handle was closed.
    pub fn closes(&self, handle: HandleId) -> usize {
        self.state
            .lock()
            .unwrap()
            .closes
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        self.state.lock().unwrap().closes.values().sum()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    type Session = ScriptedSession;

    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Self::Session, SessionConstructionError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(SessionConstructionError::SpawnFailed(
                    "backend unreachable".to_string(),
                ));
            }
        }
        let session = self.open();
        let mut state = self.state.lock().unwrap();
        state.connected.push((session.id, options.clone()));
        state.open += 1;
        state.max_open = state.max_open.max(state.open);
        Ok(session)
    }
}

pub struct ScriptedSession {
    id: HandleId,
    state: Arc<Mutex<State>>,
    messages: Mutex<Vec<String>>,
}

impl ScriptedSession {
    /// Messages dispatched so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentSession for ScriptedSession {
    fn id(&self) -> HandleId {
        self.id
    }

    async fn dispatch(&self, message: &str) -> Result<EventStream, DispatchError> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            if std::mem::take(&mut state.fail_dispatch) {
                return Err(DispatchError::Send("connection reset".to_string()));
            }
            state.replies.pop_front().unwrap_or_else(|| {
                vec![
                    Ok(ContentEvent::text("ok")),
                    Ok(ContentEvent::ResultSummary(ResultSummary::default())),
                ]
            })
        };
        self.messages.lock().unwrap().push(message.to_string());
        Ok(futures::stream::iter(reply).boxed())
    }

    async fn close(&self) -> Result<(), TeardownError> {
        let delay = self.state.lock().unwrap().close_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let closes = state.closes.entry(self.id).or_default();
        *closes += 1;
        if *closes == 1 {
            state.open = state.open.saturating_sub(1);
        }
        if state.fail_close {
            return Err(TeardownError::Kill("process already gone".to_string()));
        }
        Ok(())
    }
}

/// Log output captured in memory.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Route this thread's log output into the buffer until the guard drops.
    pub fn capture(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
