//! Environment-derived configuration.

use std::{fmt, time::Duration};

use crate::{error::ConfigurationError, options::DEFAULT_MODEL};

/// Default idle time after which a chat's session is replaced (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default minimum time a status stays visible before the next one.
pub const DEFAULT_MIN_STATUS_DISPLAY: Duration = Duration::from_secs(2);

/// Default agent executable.
pub const DEFAULT_CLAUDE_BIN: &str = "claude";

const OAUTH_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";
const SESSION_TIMEOUT_VAR: &str = "SESSION_TIMEOUT";
const MIN_STATUS_DISPLAY_VAR: &str = "MIN_STATUS_DISPLAY_TIME";
const MODEL_VAR: &str = "CLAUDE_MODEL";
const CLAUDE_BIN_VAR: &str = "CLAUDE_BIN";

/// Process-wide agent settings.
#[derive(Clone)]
pub struct AgentConfig {
    /// Credential handed to the agent process.
    pub oauth_token: String,
    pub session_timeout: Duration,
    pub min_status_display: Duration,
    pub model: String,
    /// Command used to launch the agent.
    pub claude_bin: String,
}

impl AgentConfig {
    /// Config with defaults for everything but the credential.
    #[must_use]
    pub fn new(oauth_token: impl Into<String>) -> Self {
        Self {
            oauth_token: oauth_token.into(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            min_status_display: DEFAULT_MIN_STATUS_DISPLAY,
            model: DEFAULT_MODEL.to_string(),
            claude_bin: DEFAULT_CLAUDE_BIN.to_string(),
        }
    }

    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns error if the credential is missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns error if the credential is missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let oauth_token = lookup(OAUTH_TOKEN_VAR)
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigurationError::Missing(OAUTH_TOKEN_VAR))?;

        let mut config = Self::new(oauth_token);

        if let Some(raw) = lookup(SESSION_TIMEOUT_VAR) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(SESSION_TIMEOUT_VAR, &raw))?;
            config.session_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(MIN_STATUS_DISPLAY_VAR) {
            config.min_status_display = raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid(MIN_STATUS_DISPLAY_VAR, &raw))?;
        }

        if let Some(model) = lookup(MODEL_VAR).filter(|m| !m.trim().is_empty()) {
            config.model = model;
        }

        if let Some(bin) = lookup(CLAUDE_BIN_VAR).filter(|b| !b.trim().is_empty()) {
            config.claude_bin = bin;
        }

        Ok(config)
    }

    /// Credential prefix safe to print in startup logs.
    #[must_use]
    pub fn redacted_token(&self) -> String {
        let prefix: String = self.oauth_token.chars().take(15).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("oauth_token", &self.redacted_token())
            .field("session_timeout", &self.session_timeout)
            .field("min_status_display", &self.min_status_display)
            .field("model", &self.model)
            .field("claude_bin", &self.claude_bin)
            .finish()
    }
}

fn invalid(var: &'static str, value: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        var,
        value: value.to_string(),
    }
}
