//! In-process datagram network.
//!
//! Each registered agent owns an unbounded mailbox. Sends encode the message
//! to JSON and push the bytes into the recipient's mailbox, so receivers go
//! through the same decode path as over a real wire. A configurable loss
//! rate silently drops datagrams.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agora_core::AgentId;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::NetError;
use crate::message::{Envelope, MarketMessage};
use crate::transport::{BoxFuture, Transport};

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    /// Datagrams placed in a mailbox.
    pub delivered: u64,
    /// Datagrams dropped by loss injection.
    pub lost: u64,
    /// Sends that failed (unknown or closed recipient).
    pub failed: u64,
}

/// Shared in-memory network.
#[derive(Debug)]
pub struct InProcessNetwork {
    mailboxes: RwLock<HashMap<AgentId, mpsc::UnboundedSender<Envelope>>>,
    loss_rate: f64,
    rng: Mutex<StdRng>,
    delivered: AtomicU64,
    lost: AtomicU64,
    failed: AtomicU64,
}

impl Default for InProcessNetwork {
    fn default() -> Self {
        Self::with_loss(0.0, None)
    }
}

impl InProcessNetwork {
    /// Creates a lossless network.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a network dropping each datagram with probability `loss_rate`.
    #[must_use]
    pub fn with_loss(loss_rate: f64, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
            delivered: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Registers an agent and returns its endpoint.
    ///
    /// Registering the same identity again replaces the old mailbox.
    pub fn register(self: &Arc<Self>, id: AgentId) -> NodeEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.write().insert(id.clone(), tx);
        debug!(agent = %id, "registered on network");
        NodeEndpoint {
            id,
            network: Arc::clone(self),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Removes an agent's mailbox; later sends to it fail.
    pub fn deregister(&self, id: &AgentId) {
        self.mailboxes.write().remove(id);
    }

    /// Returns true if the agent has a mailbox.
    #[must_use]
    pub fn is_registered(&self, id: &AgentId) -> bool {
        self.mailboxes.read().contains_key(id)
    }

    /// Pushes a raw datagram, bypassing encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient is unknown or its mailbox is closed.
    pub fn deliver(&self, envelope: Envelope) -> Result<(), NetError> {
        if self.loss_rate > 0.0 && self.rng.lock().gen_bool(self.loss_rate) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            trace!(from = %envelope.from, to = %envelope.to, "datagram lost");
            return Ok(());
        }
        let mailboxes = self.mailboxes.read();
        let Some(tx) = mailboxes.get(&envelope.to) else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(NetError::UnknownRecipient(envelope.to));
        };
        let to = envelope.to.clone();
        if tx.send(envelope).is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(NetError::MailboxClosed(to));
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of the delivery counters.
    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// One agent's attachment to an [`InProcessNetwork`].
#[derive(Debug)]
pub struct NodeEndpoint {
    id: AgentId,
    network: Arc<InProcessNetwork>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl NodeEndpoint {
    /// The network this endpoint is attached to.
    #[must_use]
    pub fn network(&self) -> &Arc<InProcessNetwork> {
        &self.network
    }
}

impl Transport for NodeEndpoint {
    fn local_id(&self) -> &AgentId {
        &self.id
    }

    fn send<'a>(&'a self, to: &'a AgentId, message: &'a MarketMessage) -> BoxFuture<'a, Result<(), NetError>> {
        Box::pin(async move {
            let envelope = Envelope::seal(self.id.clone(), to.clone(), message)?;
            trace!(from = %self.id, to = %to, tipo = message.kind(), "sending");
            self.network.deliver(envelope)
        })
    }

    fn recv_timeout<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Option<Envelope>> {
        Box::pin(async move {
            let mut inbox = self.inbox.lock().await;
            tokio::time::timeout(timeout, inbox.recv()).await.ok().flatten()
        })
    }
}
