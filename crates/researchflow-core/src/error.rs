use std::path::PathBuf;

use thiserror::Error;

/// Core error type for ResearchFlow.
///
/// Anything surfacing as a `ResearchError` from a run is fatal to that run;
/// recoverable tool failures never reach this type.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("reasoning engine failure: {0}")]
    Engine(#[from] EngineError),
    #[error("state invariant violated: {0}")]
    StateInvariant(String),
    #[error("run timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::StateInvariant(reason.into())
    }
}

/// Failure reported by the external reasoning provider.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("reasoning engine request timed out")]
    Timeout,
    #[error("provider failure: {0}")]
    Provider(String),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Failure raised by a tool invocation.
///
/// These stay inside the tool boundary: the tool execution node renders them
/// into result messages so the conversation can continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),
    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("Tool '{tool}' failed: {message}")]
    ExecutionFailure { tool: String, message: String },
}

impl ToolError {
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
