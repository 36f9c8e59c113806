//! CLI error types.

use agora_agent::AgentError;
use agora_core::CoreError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// The simulation could not be built or driven.
    #[error("simulation error: {0}")]
    Simulation(#[from] AgentError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
