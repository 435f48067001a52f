//! Human-readable one-liners for tool invocations.

use chat_agents_core::{ToolInvocation, ToolKind};

/// Characters of a shell command shown when it has no description.
pub const COMMAND_PREVIEW_CHARS: usize = 50;

/// Appended to a truncated command preview.
pub const TRUNCATION_MARKER: &str = "...";

/// Render a status line for a tool invocation.
#[must_use]
pub fn describe(invocation: &ToolInvocation) -> String {
    match invocation.kind() {
        ToolKind::Bash => match invocation.str_param("description") {
            Some(description) => format!("⚙️ {description}"),
            None => {
                let command = invocation.str_param("command").unwrap_or_default();
                let preview: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
                format!("⚙️ Running: {preview}{TRUNCATION_MARKER}")
            }
        },
        ToolKind::Read => {
            let name = invocation
                .str_param("file_path")
                .and_then(base_name)
                .unwrap_or("file");
            format!("📖 Reading: {name}")
        }
        ToolKind::Grep => {
            let pattern = invocation.str_param("pattern").unwrap_or_default();
            format!("🔍 Searching: «{pattern}»")
        }
        ToolKind::Glob => {
            let pattern = invocation.str_param("pattern").unwrap_or_default();
            format!("📁 Finding files: {pattern}")
        }
        ToolKind::Other(name) => format!("🔧 {name}"),
    }
}

/// Last `/`-separated segment, `None` for an empty path.
fn base_name(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    path.rsplit('/').next()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn invocation(name: &str, parameters: serde_json::Value) -> ToolInvocation {
        ToolInvocation::new(name, parameters)
    }

    #[test]
    fn test_bash_prefers_description() {
        let text = describe(&invocation(
            "Bash",
            json!({"command": "python3 analyze.py", "description": "Analyze sales data"}),
        ));
        assert_eq!(text, "⚙️ Analyze sales data");
    }

    #[test]
    fn test_bash_truncates_command() {
        let command = "a".repeat(80);
        let text = describe(&invocation("Bash", json!({ "command": command })));

        let expected = format!("{}{TRUNCATION_MARKER}", "a".repeat(50));
        assert!(text.contains(&expected));
        assert!(!text.contains(&"a".repeat(51)));
    }

    #[test]
    fn test_bash_truncation_respects_char_boundaries() {
        let command = "ё".repeat(60);
        let text = describe(&invocation("Bash", json!({ "command": command })));
        assert!(text.ends_with(&format!("{}...", "ё".repeat(50))));
    }

    #[test]
    fn test_read_shows_base_name_only() {
        let text = describe(&invocation("Read", json!({"file_path": "/x/y/report.xlsx"})));
        assert_eq!(text, "📖 Reading: report.xlsx");
        assert!(!text.contains("/x/y"));
    }

    #[test]
    fn test_read_without_path() {
        assert_eq!(describe(&invocation("Read", json!({}))), "📖 Reading: file");
        assert_eq!(
            describe(&invocation("Read", json!({"file_path": ""}))),
            "📖 Reading: file"
        );
    }

    #[test]
    fn test_search_tools() {
        assert_eq!(
            describe(&invocation("Grep", json!({"pattern": "invoice"}))),
            "🔍 Searching: «invoice»"
        );
        assert_eq!(
            describe(&invocation("Glob", json!({"pattern": "media/*.xlsx"}))),
            "📁 Finding files: media/*.xlsx"
        );
    }

    #[test]
    fn test_unknown_tool() {
        assert_eq!(describe(&invocation("WebFetch", json!(null))), "🔧 WebFetch");
    }
}
