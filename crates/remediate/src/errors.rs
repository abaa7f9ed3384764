//! Error types for the remediate crate.
//!
//! Only infrastructure failures and caller mistakes are errors. Rejected
//! queries, failed cluster reads, partial execution failures and similar
//! business outcomes are recorded as data on the session instead.

use thiserror::Error;

/// Errors raised by the remediation engine.
#[derive(Error, Debug, Clone)]
pub enum RemediateError {
    // Session errors
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    #[error("Invalid session ID: '{id}'")]
    InvalidSessionId { id: String },

    #[error("Session '{id}' is {status}; cannot {operation}")]
    InvalidState {
        id: String,
        status: String,
        operation: String,
    },

    // Storage errors
    #[error("Storage error: {reason}")]
    StorageError { reason: String },

    #[error("Failed to read file '{path}': {reason}")]
    FileReadError { path: String, reason: String },

    #[error("Failed to write file '{path}': {reason}")]
    FileWriteError { path: String, reason: String },

    #[error("Failed to parse JSON: {reason}")]
    JsonParseError { reason: String },

    // Configuration errors
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    // Model backend errors
    #[error("AI error: {0}")]
    Ai(String),

    #[error("AI request timed out after {secs}s")]
    AiTimeout { secs: u64 },

    #[error("Model response malformed: {reason}")]
    ModelResponseMalformed { reason: String },

    #[error("Prompt rendering failed: {reason}")]
    PromptError { reason: String },

    // Cluster errors
    #[error("Cluster command failed to start: {reason}")]
    ClusterCommand { reason: String },

    /// The only class the facade propagates instead of returning as data.
    #[error("{component} unavailable: {reason}")]
    InfrastructureUnavailable { component: String, reason: String },
}

impl RemediateError {
    /// Whether a single retry of the failing model call is worthwhile.
    #[must_use]
    pub fn is_retryable_model_failure(&self) -> bool {
        matches!(self, Self::Ai(_) | Self::AiTimeout { .. })
    }
}

impl From<std::io::Error> for RemediateError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RemediateError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParseError {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for remediation operations.
pub type RemediateResult<T> = Result<T, RemediateError>;
