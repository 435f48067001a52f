//! Permission decisions for tool invocations the CLI asks about.

use serde_json::Value;

use crate::claude::types::PermissionResult;

/// Allow-list of tools a session may use.
///
/// Declared tools are already pre-approved on the command line; anything
/// the CLI still asks about is allowed only if it is on this list.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allowed: Vec<String>,
}

impl ToolPolicy {
    /// Create a policy from the declared tool names.
    #[must_use]
    pub fn new<I>(allowed: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the tool is on the allow-list.
    #[must_use]
    pub fn permits(&self, tool_name: &str) -> bool {
        self.allowed.iter().any(|t| t == tool_name)
    }

    /// Decide a `can_use_tool` request.
    #[must_use]
    pub fn decide(&self, tool_name: &str, input: Value) -> PermissionResult {
        if self.permits(tool_name) {
            PermissionResult::Allow {
                updated_input: input,
            }
        } else {
            PermissionResult::Deny {
                message: format!("Tool '{tool_name}' is not available in this chat"),
                interrupt: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_allows_declared_tools() {
        let policy = ToolPolicy::new(["Read", "Bash"]);
        let input = json!({"file_path": "/a"});
        match policy.decide("Read", input.clone()) {
            PermissionResult::Allow { updated_input } => assert_eq!(updated_input, input),
            PermissionResult::Deny { .. } => panic!("Read should be allowed"),
        }
    }

    #[test]
    fn test_denies_everything_else() {
        let policy = ToolPolicy::new(["Read"]);
        assert!(!policy.permits("Write"));
        assert!(matches!(
            policy.decide("Write", json!({})),
            PermissionResult::Deny { message, .. } if message.contains("Write")
        ));
        assert!(!ToolPolicy::default().permits("Read"));
    }
}
