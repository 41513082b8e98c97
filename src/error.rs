//! Error types for the credit pack orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Search error: {0}")]
    SearchError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    // =============================
    // Session Errors
    // =============================

    #[error("Invalid step index {index}: history has {len} step(s)")]
    InvalidStepIndex { index: usize, len: usize },

    #[error("Unknown context key: {0}")]
    UnknownContextKey(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
