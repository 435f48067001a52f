//! Per-chat question answering on top of the registry and aggregator.

use std::time::Duration;

use chat_agents_core::{AgentBackend, AgentConfig, AgentError, ContextId, SessionConfig, StatusSink};

use crate::{aggregator::Aggregator, registry::SessionRegistry};

/// Characters of an incoming message included in the query log line.
const QUERY_LOG_CHARS: usize = 100;

/// Answers chat messages, one backend session per chat.
pub struct ChatAgent<B: AgentBackend> {
    registry: SessionRegistry<B>,
    aggregator: Aggregator,
}

impl<B: AgentBackend> ChatAgent<B> {
    #[must_use]
    pub fn new(backend: B, config: &AgentConfig) -> Self {
        Self::with_parts(
            SessionRegistry::new(backend, config.session_timeout).with_model(&config.model),
            config.min_status_display,
        )
    }

    #[must_use]
    pub const fn with_parts(registry: SessionRegistry<B>, min_status_display: Duration) -> Self {
        Self {
            registry,
            aggregator: Aggregator::new(min_status_display),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry<B> {
        &self.registry
    }

    /// Answer `message` in the chat's ongoing conversation.
    ///
    /// Progress goes to `sink` while the agent works. A session whose query
    /// fails is discarded so the next message starts a fresh one.
    ///
    /// # Errors
    /// Returns error if no session can be constructed or the query fails.
    pub async fn query(
        &self,
        context_id: ContextId,
        message: &str,
        config: &SessionConfig,
        sink: Option<&dyn StatusSink>,
    ) -> Result<String, AgentError> {
        let preview: String = message.chars().take(QUERY_LOG_CHARS).collect();
        tracing::info!(context_id, "[QUERY] {preview}");

        let lease = self.registry.acquire(context_id, config).await?;
        let outcome = self.aggregator.run(context_id, &*lease, message, sink).await;
        match outcome {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(context_id, "[QUERY] Query failed: {e}");
                self.registry.discard(lease).await;
                Err(e.into())
            }
        }
    }

    /// Forget the chat's conversation. Returns whether there was one.
    pub async fn reset(&self, context_id: ContextId) -> bool {
        self.registry.release(context_id).await
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        self.registry.release_all().await;
    }
}
