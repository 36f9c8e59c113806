//! Error types for agora-agent.

use agora_core::CoreError;
use agora_net::NetError;
use thiserror::Error;

/// Errors raised while building or driving agents.
///
/// Nothing inside a deliberation cycle returns one of these: failed sends,
/// malformed messages and guard violations are logged and skipped.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration or IO problem.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Transport problem.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// The simulation cannot be assembled as requested.
    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    /// The simulation was already started or stopped.
    #[error("simulation is {0}")]
    WrongState(&'static str),
}
