//! Claude Code backend with SDK protocol support.
//!
//! Provides:
//! - `ClaudeBackend` / `ClaudeSession` - Long-lived CLI sessions
//! - Claude Code stream-json protocol types
//! - Command building utilities
//! - Tool permission policy

pub mod approvals;
pub mod claude;
pub mod command;

pub use approvals::ToolPolicy;
pub use claude::{ClaudeBackend, ClaudeSession};
pub use command::{CommandBuilder, CommandParts};
