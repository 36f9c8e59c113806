//! # agora-core
//!
//! Market primitives shared by every Agora agent.
//!
//! This crate provides:
//!
//! - [`Catalog`], [`CatalogEntry`], [`Offer`]: what sellers stock and what buyers cache
//! - [`VarietyTable`]: the fixed product → variant → ethics registry
//! - [`DecisionLog`], [`CompletionSet`], [`LocationRegistry`]: the only
//!   process-wide mutable structures, each behind its own lock
//! - [`MarketConfig`]: every tunable of a simulation run

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod types;
pub mod variety;

pub use config::{GossipMode, MarketConfig, QuantityRange, ScoringWeights, Timings};
pub use error::CoreError;
pub use ledger::{ActionKind, CompletionSet, DecisionLog, DecisionRecord, LocationRegistry};
pub use types::{
    AgentId, Catalog, CatalogEntry, EthicsVector, Location, Offer, ProductName, SaleRecord,
    VariantId,
};
pub use variety::{ETHICS_CRITERIA, PRODUCTS, VarietyTable};
