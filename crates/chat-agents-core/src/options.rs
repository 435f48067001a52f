//! Backend session options and the per-chat system prompt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{SessionConfig, traits::ContextId};

/// Tools every chat session is allowed to use.
pub const DEFAULT_ALLOWED_TOOLS: [&str; 4] = ["Read", "Bash", "Grep", "Glob"];

/// Model alias used when none is configured.
pub const DEFAULT_MODEL: &str = "sonnet";

/// Everything a backend needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Directory the agent runs in.
    pub working_dir: PathBuf,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub model: String,
    /// Ask the backend for incremental message delivery.
    pub include_partial_messages: bool,
}

impl SessionOptions {
    /// Options for a chat session using the standard prompt and tool set.
    #[must_use]
    pub fn for_chat(context_id: ContextId, config: &SessionConfig, model: &str) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            system_prompt: system_prompt(context_id, config),
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(ToString::to_string).collect(),
            model: model.to_string(),
            include_partial_messages: true,
        }
    }
}

/// Render the system prompt for one chat.
#[must_use]
pub fn system_prompt(context_id: ContextId, config: &SessionConfig) -> String {
    let chat_dir = config.working_dir.display();
    let history_file = config.history_file.display();
    let media_dir = config.media_dir.display();
    let agent_files_dir = config.agent_files_dir.display();

    format!(
        "You are an AI assistant for chat {context_id}.

Your job is to help people in this chat work with the conversation archive and its data.

MEMORY:
- You remember the whole conversation since this session started, including your own previous answers.
- Follow-up questions (\"how many were there?\", \"which one is the biggest?\") refer to YOUR PREVIOUS ANSWER in this conversation.
- Never claim you do not remember or that you need to look it up again. Use the files for NEW questions.

YOUR ENVIRONMENT:
- Working directory: {chat_dir}
- Conversation history: {history_file}
- Files from chat members: {media_dir}/
- Your own files (charts, reports): {agent_files_dir}/

AVAILABLE TOOLS:
- Read: read files (history.txt, Excel, CSV, JSON)
- Grep: search the conversation history by pattern
- Glob: find files by mask
- Bash: run commands and python scripts for data analysis

RULES:
1. DATA ANALYSIS:
   - Use pandas for Excel/CSV and matplotlib/seaborn for charts.
   - Save every result to {agent_files_dir}/
2. ANSWER STYLE:
   - Be SHORT and COMPACT; use emoji to structure the answer.
   - NEVER use markdown tables; use emoji lists instead.
   - Put detailed data into files (Excel, CSV).
3. FILES:
   - Always give the FULL PATH when you create a file, e.g. {agent_files_dir}/chart.png
   - Mention every created file in your answer.
4. SAFETY:
   - Work ONLY inside {chat_dir}
   - Never touch other chats.

Start working!"
    )
}
