use thiserror::Error;

/// Failures that end a turn and cross the agent boundary.
///
/// Malformed stream fragments and tool failures never show up here: the first are
/// skipped while parsing, the second are handed back to the model as text.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0} (check your network connection and the provider host)")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl AgentError {
    pub fn missing_credential(provider: &str, env_var: &str) -> Self {
        AgentError::Configuration(format!(
            "{} requires an API key; set {} or add it to the config",
            provider, env_var
        ))
    }

    /// Build a protocol error from an HTTP status and the vendor's message
    pub fn status(status: reqwest::StatusCode, message: impl AsRef<str>) -> Self {
        let message = message.as_ref().trim();
        if message.is_empty() {
            AgentError::Protocol(format!("Request failed: {}", status))
        } else {
            AgentError::Protocol(format!("Request failed: {} - {}", status, message))
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Failure of a single tool invocation, rendered back to the model as text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

impl ToolError {
    /// The `[Error: ...]` payload the model sees as the tool result
    pub fn to_tool_output(&self) -> String {
        format!("[Error: {}]", self)
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
