//! Core traits for agent backends and status delivery.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    ContentEvent, SessionOptions, StatusUpdate,
    error::{DispatchError, SessionConstructionError, SinkError, TeardownError},
};

/// Identifier of one independent conversation (a chat id).
pub type ContextId = i64;

/// Live event sequence for one dispatched query.
pub type EventStream = BoxStream<'static, Result<ContentEvent, DispatchError>>;

/// Identity of a constructed session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(Uuid);

impl HandleId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Something that can open agent sessions.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Session type produced by this backend.
    type Session: AgentSession + 'static;

    /// Open a new live session.
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Self::Session, SessionConstructionError>;
}

/// A live, stateful conversation with the agent.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Unique id of this handle.
    fn id(&self) -> HandleId;

    /// Send a user message and return the events answering it.
    ///
    /// The stream ends after the [`ContentEvent::ResultSummary`].
    async fn dispatch(&self, message: &str) -> Result<EventStream, DispatchError>;

    /// Release the session. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TeardownError>;
}

/// Receiver side of status updates (typically the chat transport).
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one status update.
    async fn deliver(&self, update: StatusUpdate) -> Result<(), SinkError>;
}

#[async_trait]
impl StatusSink for mpsc::Sender<StatusUpdate> {
    async fn deliver(&self, update: StatusUpdate) -> Result<(), SinkError> {
        self.send(update).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl StatusSink for mpsc::UnboundedSender<StatusUpdate> {
    async fn deliver(&self, update: StatusUpdate) -> Result<(), SinkError> {
        self.send(update).map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_handle_ids_are_unique() {
        assert_ne!(HandleId::new(), HandleId::new());
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::channel(4);
        assert_ok!(tx.deliver(StatusUpdate::from("one".to_string())).await);
        assert_eq!(rx.recv().await.unwrap().as_str(), "one");

        drop(rx);
        assert_err!(tx.deliver(StatusUpdate::from("two".to_string())).await);
    }

    #[tokio::test]
    async fn test_unbounded_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_ok!(tx.deliver(StatusUpdate::from("ok".to_string())).await);
        assert_eq!(rx.recv().await.unwrap().into_inner(), "ok");
    }
}
