//! Error types for the fraud query agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, QueryAgentError>;

#[derive(Error, Debug)]
pub enum QueryAgentError {

    // =============================
    // Construction Errors (fatal)
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Credential error: {0}")]
    CredentialsError(String),

    // =============================
    // Remote Call Errors
    // =============================

    #[error("Completion endpoint error: {0}")]
    CompletionError(String),

    #[error("BigQuery error: {0}")]
    StoreError(String),

    // =============================
    // Tool Routing Errors
    // =============================

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
