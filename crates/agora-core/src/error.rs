//! Error types for agora-core.

use thiserror::Error;

/// Errors that can occur while loading or validating market state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
