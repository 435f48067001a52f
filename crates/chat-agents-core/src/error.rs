//! Error taxonomy.
//!
//! Only [`SessionConstructionError`] and [`DispatchError`] ever leave the
//! core (wrapped in [`AgentError`]). Teardown and sink failures are logged
//! where they happen.

use thiserror::Error;

/// Startup configuration error. Fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{0} not found in environment")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Creating a backend session failed.
#[derive(Debug, Error)]
pub enum SessionConstructionError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Command build error: {0}")]
    CommandBuild(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending a query or reading its events failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to send message: {0}")]
    Send(String),
    #[error("Event stream closed before the result arrived")]
    StreamClosed,
    #[error("Session already closed")]
    SessionClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closing a backend session failed.
#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("Failed to stop agent process: {0}")]
    Kill(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivering a status update failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Status receiver dropped")]
    Closed,
    #[error("Status delivery failed: {0}")]
    Delivery(String),
}

/// Failure surfaced to the caller of a query.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Session construction failed: {0}")]
    Construction(#[from] SessionConstructionError),
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}
