//! # agora-net
//!
//! Messaging layer of the Agora market.
//!
//! Agents talk only through unordered, at-most-once datagrams addressed by
//! [`AgentId`](agora_core::AgentId). This crate provides:
//!
//! - [`MarketMessage`]: the four JSON messages, discriminated by `tipo`
//! - [`Envelope`]: a raw datagram with sender and recipient
//! - [`Transport`]: the seam agents send and receive through
//! - [`InProcessNetwork`]: per-agent mailboxes with optional loss injection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod network;
pub mod transport;

pub use error::NetError;
pub use message::{Envelope, MarketMessage};
pub use network::{InProcessNetwork, NetworkStats, NodeEndpoint};
pub use transport::{BoxFuture, Transport};
