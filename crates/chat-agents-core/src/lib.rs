//! Core abstractions for per-chat agent sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `ContentEvent` - Typed events of one query's answer
//! - `SessionConfig` / `SessionOptions` - What a session is opened with
//! - `AgentConfig` - Environment-derived settings
//! - Backend, session and status sink traits
//! - The error taxonomy

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod options;
pub mod traits;

pub use config::AgentConfig;
pub use context::SessionConfig;
pub use error::{
    AgentError, ConfigurationError, DispatchError, SessionConstructionError, SinkError,
    TeardownError,
};
pub use event::{ContentEvent, ResultSummary, StatusUpdate, TokenUsage, ToolInvocation, ToolKind};
pub use options::SessionOptions;
pub use traits::{AgentBackend, AgentSession, ContextId, EventStream, HandleId, StatusSink};
