use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures produced while executing a single tool call.
///
/// These never abort a turn: the orchestrator turns them into tool-result
/// text so the model can see what went wrong and recover.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{}", backend_message(.status, .message))]
    Backend {
        status: Option<u16>,
        message: String,
    },
}

fn backend_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("Backend returned {}: {}", status, message),
        None => format!("Backend error: {}", message),
    }
}

impl ToolError {
    pub fn backend<S: Into<String>>(message: S) -> Self {
        ToolError::Backend {
            status: None,
            message: message.into(),
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures of the LLM call itself. The adapter never retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider request failed: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Invalid provider request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Errors that end a turn in the `Errored` state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    #[error(transparent)]
    Provider(ProviderError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool registry error: {0}")]
    Registry(String),

    #[error("Invalid conversation history: {0}")]
    InvalidHistory(String),
}

// A provider that answers with something unreadable broke the protocol;
// everything else is a failure of the call itself.
impl From<ProviderError> for TurnError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MalformedResponse(message) => TurnError::Protocol(message),
            other => TurnError::Provider(other),
        }
    }
}

/// Errors raised when managing tool definitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("A tool named '{0}' already exists")]
    DuplicateName(String),

    #[error("Invalid tool name '{0}': must match [a-zA-Z0-9_-] and be at most 64 characters")]
    InvalidName(String),

    #[error("Invalid input schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid tool definition: {0}")]
    InvalidDefinition(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
