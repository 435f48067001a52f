//! Minimum-display-time throttling of status updates.

use std::time::Duration;

use chat_agents_core::{StatusSink, StatusUpdate};
use tokio::time::Instant;

/// Spaces out status deliveries for one query.
///
/// Every status stays visible for at least `min_display` before the next
/// one replaces it. Nothing is dropped or merged; deliveries keep call
/// order. Not shared between queries.
pub struct StatusThrottler<'a> {
    sink: Option<&'a dyn StatusSink>,
    min_display: Duration,
    last_emit: Option<Instant>,
}

impl<'a> StatusThrottler<'a> {
    /// Create a throttler. With no sink, `emit` does nothing.
    #[must_use]
    pub const fn new(sink: Option<&'a dyn StatusSink>, min_display: Duration) -> Self {
        Self {
            sink,
            min_display,
            last_emit: None,
        }
    }

    /// Deliver `text`, first waiting out the previous status if needed.
    ///
    /// Sink failures are logged and otherwise ignored.
    pub async fn emit(&mut self, text: impl Into<String>) {
        let Some(sink) = self.sink else {
            return;
        };

        if let Some(last) = self.last_emit {
            let ready_at = last + self.min_display;
            let now = Instant::now();
            if now < ready_at {
                tracing::debug!(
                    "[STATUS_THROTTLE] Waiting {:.2}s (elapsed: {:.2}s)",
                    (ready_at - now).as_secs_f64(),
                    (now - last).as_secs_f64()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        if let Err(e) = sink.deliver(StatusUpdate::from(text.into())).await {
            tracing::warn!("[STATUS] Failed to deliver status update: {e}");
        }
        self.last_emit = Some(Instant::now());
    }
}
