//! Claude Code executor and SDK protocol.

pub mod client;
pub mod protocol;
pub mod session;
pub mod types;

pub use client::ClaudeClient;
pub use protocol::ProtocolPeer;
pub use session::{ClaudeBackend, ClaudeSession};
