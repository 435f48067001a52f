//! Per-chat session configuration.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::ContextId;

/// File name of the archived conversation inside a chat directory.
pub const HISTORY_FILE_NAME: &str = "history.txt";
/// Directory holding files uploaded by chat members.
pub const MEDIA_DIR_NAME: &str = "media";
/// Directory where the agent writes charts, reports and other output.
pub const AGENT_FILES_DIR_NAME: &str = "agent_files";

/// Filesystem layout a session works against.
///
/// Supplied by the archiving collaborator; the paths are rendered into the
/// system prompt so the agent knows where the chat's data lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Working directory for the agent session.
    pub working_dir: PathBuf,

    /// Archived conversation history.
    pub history_file: PathBuf,

    /// Files sent by chat members.
    pub media_dir: PathBuf,

    /// Files produced by the agent.
    pub agent_files_dir: PathBuf,

    /// Arbitrary metadata for app-specific needs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl SessionConfig {
    /// Create a config from explicit paths.
    #[must_use]
    pub fn new(
        working_dir: PathBuf,
        history_file: PathBuf,
        media_dir: PathBuf,
        agent_files_dir: PathBuf,
    ) -> Self {
        Self {
            working_dir,
            history_file,
            media_dir,
            agent_files_dir,
            metadata: HashMap::new(),
        }
    }

    /// Conventional layout for one chat under an archive root:
    /// `<root>/<context_id>/{history.txt,media,agent_files}`.
    #[must_use]
    pub fn for_chat(archive_root: &Path, context_id: ContextId) -> Self {
        let chat_dir = archive_root.join(context_id.to_string());
        Self::new(
            chat_dir.clone(),
            chat_dir.join(HISTORY_FILE_NAME),
            chat_dir.join(MEDIA_DIR_NAME),
            chat_dir.join(AGENT_FILES_DIR_NAME),
        )
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_chat_layout() {
        let config = SessionConfig::for_chat(Path::new("/data/chats"), -100_42);

        assert_eq!(config.working_dir, PathBuf::from("/data/chats/-10042"));
        assert_eq!(
            config.history_file,
            PathBuf::from("/data/chats/-10042/history.txt")
        );
        assert_eq!(config.media_dir, PathBuf::from("/data/chats/-10042/media"));
        assert_eq!(
            config.agent_files_dir,
            PathBuf::from("/data/chats/-10042/agent_files")
        );
    }

    #[test]
    fn test_metadata() {
        let mut config = SessionConfig::for_chat(Path::new("/tmp"), 1);
        assert!(config.get_metadata("title").is_none());

        config.set_metadata("title", Value::from("Sales"));
        assert_eq!(config.get_metadata("title"), Some(&Value::from("Sales")));
    }
}
