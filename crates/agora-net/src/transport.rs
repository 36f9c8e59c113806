//! The seam between agents and whatever carries their datagrams.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use agora_core::AgentId;

use crate::error::NetError;
use crate::message::{Envelope, MarketMessage};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Datagram transport bound to one agent identity.
///
/// Delivery is at-most-once and unordered across recipients. Implementations
/// never retry.
pub trait Transport: Send + Sync {
    /// Identity this transport sends from.
    fn local_id(&self) -> &AgentId;

    /// Sends a message to one agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient is unknown or the message cannot be
    /// encoded. A message lost in transit is not an error.
    fn send<'a>(&'a self, to: &'a AgentId, message: &'a MarketMessage) -> BoxFuture<'a, Result<(), NetError>>;

    /// Waits up to `timeout` for the next datagram.
    ///
    /// Returns `None` on timeout or once the mailbox is closed.
    fn recv_timeout<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Option<Envelope>>;

    /// Sends the same message to several agents, returning who it was handed to.
    fn broadcast<'a>(
        &'a self,
        peers: &'a [AgentId],
        message: &'a MarketMessage,
    ) -> BoxFuture<'a, Vec<AgentId>> {
        Box::pin(async move {
            let mut delivered = Vec::with_capacity(peers.len());
            for peer in peers {
                match self.send(peer, message).await {
                    Ok(()) => delivered.push(peer.clone()),
                    Err(e) => {
                        tracing::debug!(from = %self.local_id(), to = %peer, error = %e, "broadcast send failed");
                    }
                }
            }
            delivered
        })
    }
}
