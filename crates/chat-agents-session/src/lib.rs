//! Per-chat session orchestration.
//!
//! Provides:
//! - `SessionRegistry` - One live agent session per chat, replaced when idle
//! - `Aggregator` - Turns a query's event stream into status updates and an answer
//! - `StatusThrottler` - Minimum display time between status updates
//! - `ChatAgent` - The query entry point tying them together

pub mod agent;
pub mod aggregator;
pub mod registry;
pub mod throttle;
pub mod tool_description;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::ChatAgent;
pub use aggregator::{Aggregation, Aggregator, FALLBACK_RESPONSE};
pub use registry::{SessionInfo, SessionLease, SessionRegistry};
pub use throttle::StatusThrottler;
pub use tool_description::describe;
