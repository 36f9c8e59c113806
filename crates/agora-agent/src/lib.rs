//! # agora-agent
//!
//! BDI agents of the Agora market and the simulation that runs them.
//!
//! Every agent owns a [`BeliefStore`] and runs a fixed-interval cycle:
//! revise beliefs, deliberate over an ordered [`DesireSet`], and dispatch
//! the single resulting plan as its own task. Three roles exist:
//!
//! - [`Buyer`]: restocks indispensables, shops, consumes, finishes
//! - [`StandardSeller`]: sells, forwards sales, rotates varieties
//! - [`AdaptiveSeller`]: imitates or reevaluates catalogs through [`CatalogGossip`]
//!
//! [`Simulation`] wires a whole market on an in-process network and
//! produces a [`SimulationReport`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adaptive;
pub mod beliefs;
pub mod buyer;
pub mod context;
pub mod desire;
pub mod error;
pub mod gossip;
pub mod rotation;
pub mod scheduler;
pub mod scorer;
pub mod seller;
pub mod simulation;
pub mod transaction;

pub use adaptive::{AdaptivePlan, AdaptiveSeller};
pub use beliefs::{BeliefStore, BeliefValue, Beliefs, ForwardedSale, PeerMetric};
pub use buyer::{Buyer, BuyerPlan, BuyerProfile, BuyerSituation};
pub use context::MarketContext;
pub use desire::{DesireSet, Intention, Plan};
pub use error::AgentError;
pub use gossip::{CatalogGossip, GossipOutcome, NearbySales};
pub use rotation::{RotationTrigger, VariantChange, VarietyRotator};
pub use scheduler::{CycleReport, Deliberator, MessageHandler, TaskSet, run_cycle};
pub use scorer::{MarketScorer, ScoredSeller, ethical_score};
pub use seller::{SellerPlan, SellerProfile, SellerSituation, StandardSeller};
pub use simulation::{AgentRole, AgentSnapshot, Simulation, SimulationReport};
pub use transaction::{NoOpReason, PurchaseMode, Receipt, TransactionCoordinator, TransactionResult};
