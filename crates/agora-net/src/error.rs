//! Error types for agora-net.

use agora_core::AgentId;
use thiserror::Error;

/// Errors raised while sending a message.
///
/// Agents log these and move on; no send is ever retried.
#[derive(Debug, Error)]
pub enum NetError {
    /// Nobody is registered under this identity.
    #[error("unknown recipient: {0}")]
    UnknownRecipient(AgentId),

    /// The recipient's mailbox was closed.
    #[error("mailbox closed: {0}")]
    MailboxClosed(AgentId),

    /// The message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
