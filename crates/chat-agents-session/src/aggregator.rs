//! Drains a query's event stream into status updates and a final answer.

use std::time::Duration;

use chat_agents_core::{
    AgentSession, ContentEvent, ContextId, DispatchError, EventStream, ResultSummary, StatusSink,
};
use futures::StreamExt;

use crate::{throttle::StatusThrottler, tool_description::describe};

/// Text segments shorter than this (in characters) are shown as status.
pub const STATUS_TEXT_LIMIT: usize = 200;

/// Prefix of "thinking aloud" status lines.
pub const THINKING_MARKER: &str = "💭";

/// Answer returned when the agent produced no text at all.
pub const FALLBACK_RESPONSE: &str = "Sorry, I couldn't put together an answer.";

/// What one aggregation pass collected.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub segments: Vec<String>,
    pub tools_invoked: Vec<String>,
    /// `None` when the stream ended without a result.
    pub summary: Option<ResultSummary>,
}

impl Aggregation {
    /// The last text segment, or the fallback answer.
    #[must_use]
    pub fn final_text(&self) -> &str {
        self.segments.last().map_or(FALLBACK_RESPONSE, String::as_str)
    }

    /// Input plus output tokens of the result, zero without one.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.summary.as_ref().map_or(0, |s| s.usage.total())
    }

    #[must_use]
    pub fn into_final_text(mut self) -> String {
        self.segments
            .pop()
            .unwrap_or_else(|| FALLBACK_RESPONSE.to_string())
    }
}

/// Streaming response aggregator.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    min_status_display: Duration,
}

impl Aggregator {
    #[must_use]
    pub const fn new(min_status_display: Duration) -> Self {
        Self { min_status_display }
    }

    /// Dispatch `message` on `session` and return the final answer.
    ///
    /// # Errors
    /// Returns error if dispatch fails or the stream breaks before its
    /// result. Text collected so far is discarded in that case.
    pub async fn run<A>(
        &self,
        context_id: ContextId,
        session: &A,
        message: &str,
        sink: Option<&dyn StatusSink>,
    ) -> Result<String, DispatchError>
    where
        A: AgentSession + ?Sized,
    {
        let events = session.dispatch(message).await?;
        let aggregation = self.collect(context_id, events, sink).await?;
        Ok(aggregation.into_final_text())
    }

    /// Consume `events` up to and including the result.
    ///
    /// # Errors
    /// Returns the first error the stream yields.
    pub async fn collect(
        &self,
        context_id: ContextId,
        mut events: EventStream,
        sink: Option<&dyn StatusSink>,
    ) -> Result<Aggregation, DispatchError> {
        let mut throttler = StatusThrottler::new(sink, self.min_status_display);
        let mut aggregation = Aggregation::default();

        while let Some(event) = events.next().await {
            match event? {
                ContentEvent::TextSegment { text } => {
                    if text.chars().count() < STATUS_TEXT_LIMIT {
                        throttler.emit(format!("{THINKING_MARKER} {text}")).await;
                    }
                    aggregation.segments.push(text);
                }
                ContentEvent::ToolInvocation(invocation) => {
                    tracing::info!(context_id, tool = %invocation.tool_name, "[TOOL] Tool invoked");
                    throttler.emit(describe(&invocation)).await;
                    aggregation.tools_invoked.push(invocation.tool_name);
                }
                ContentEvent::ResultSummary(summary) => {
                    aggregation.summary = Some(summary);
                    break;
                }
            }
        }

        match &aggregation.summary {
            Some(summary) => {
                let tools = if aggregation.tools_invoked.is_empty() {
                    "none".to_string()
                } else {
                    aggregation.tools_invoked.join(",")
                };
                tracing::info!(
                    context_id,
                    tokens = aggregation.total_tokens(),
                    cost = %format!("${:.4}", summary.total_cost_usd),
                    tools = %tools,
                    turns = summary.num_turns,
                    "[RESULT] Query finished"
                );
                if summary.is_error {
                    tracing::warn!(context_id, "[RESULT] Agent reported an error result");
                }
            }
            None => tracing::warn!(context_id, "[RESULT] Event stream ended without a result"),
        }

        Ok(aggregation)
    }
}
