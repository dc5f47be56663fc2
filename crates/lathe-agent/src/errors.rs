use lathe_llm::CompletionError;
use thiserror::Error;

/// Session lifecycle and orchestration failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Tool lookup, validation, and execution failures.
///
/// These are recovered into error-flagged tool results so the model can
/// see them and react; they never abort the loop.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Execution(String),
}

/// Execution environment failures (file I/O, process spawn, search).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("{0}")]
    Io(String),
    #[error("invalid pattern: {0}")]
    Pattern(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl From<EnvError> for ToolError {
    fn from(error: EnvError) -> Self {
        ToolError::Execution(error.to_string())
    }
}

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("session cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn session_closed() -> Self {
        Self::Session(SessionError::Closed)
    }
}
