//! Process-wide shared ledgers.
//!
//! These are the only structures more than one agent mutates. Each one owns
//! its own lock, distinct from any agent's belief store, and never holds it
//! across an await point, so an aborted agent task cannot leave one half
//! written.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AgentId, Location};

/// What a decision record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Buyer bought items off its shortage list.
    #[serde(rename = "compra_indispensable")]
    PriorityPurchase,
    /// Buyer bought across a seller's whole catalog.
    #[serde(rename = "compra")]
    GeneralPurchase,
    /// Buyer consumed part of its inventory.
    #[serde(rename = "consumo")]
    Consumption,
    /// Buyer finished and left the market.
    #[serde(rename = "final")]
    Finished,
    /// Seller rotated its varieties.
    #[serde(rename = "rotacion_variedades")]
    VarietyRotation,
    /// Adaptive seller cloned a better-selling peer's catalog.
    #[serde(rename = "adopta_catalogo")]
    AdoptCatalog,
    /// Adaptive seller with no sales rotated its assortment.
    #[serde(rename = "rota_surtido")]
    RotateAssortment,
    /// Adaptive seller recorded a new personal best.
    #[serde(rename = "actualiza_historico")]
    UpdateHistory,
    /// Adaptive seller switched one product's variant.
    #[serde(rename = "cambio_producto")]
    VariantChange,
    /// Full catalog snapshot after a reevaluation.
    #[serde(rename = "snapshot_catalogo")]
    CatalogSnapshot,
    /// Inputs and results of a reevaluation.
    #[serde(rename = "evaluacion_cambios")]
    ChangeEvaluation,
}

impl ActionKind {
    /// Wire/report name of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PriorityPurchase => "compra_indispensable",
            Self::GeneralPurchase => "compra",
            Self::Consumption => "consumo",
            Self::Finished => "final",
            Self::VarietyRotation => "rotacion_variedades",
            Self::AdoptCatalog => "adopta_catalogo",
            Self::RotateAssortment => "rota_surtido",
            Self::UpdateHistory => "actualiza_historico",
            Self::VariantChange => "cambio_producto",
            Self::CatalogSnapshot => "snapshot_catalogo",
            Self::ChangeEvaluation => "evaluacion_cambios",
        }
    }

    /// Returns true for buyer purchases.
    #[must_use]
    pub const fn is_purchase(&self) -> bool {
        matches!(self, Self::PriorityPurchase | Self::GeneralPurchase)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable entry of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Position in the log, starting at 0.
    pub sequence: u64,
    /// Agent that made the decision.
    pub actor: AgentId,
    /// Decision kind.
    pub action: ActionKind,
    /// Action-specific details.
    pub payload: serde_json::Value,
    /// When the record was appended.
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of every decision taken in the market.
#[derive(Debug, Default)]
pub struct DecisionLog {
    records: Mutex<Vec<DecisionRecord>>,
}

impl DecisionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and returns its sequence number.
    pub fn append(&self, actor: &AgentId, action: ActionKind, payload: serde_json::Value) -> u64 {
        let mut records = self.records.lock();
        let sequence = records.len() as u64;
        records.push(DecisionRecord {
            sequence,
            actor: actor.clone(),
            action,
            payload,
            timestamp: Utc::now(),
        });
        drop(records);
        debug!(actor = %actor, action = %action, sequence, "decision recorded");
        sequence
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every record, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().clone()
    }

    /// Records made by one agent, in append order.
    #[must_use]
    pub fn records_by(&self, actor: &AgentId) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| &r.actor == actor)
            .cloned()
            .collect()
    }

    /// Records of one kind, in append order.
    #[must_use]
    pub fn records_of(&self, action: ActionKind) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }

    /// Number of records per action kind.
    #[must_use]
    pub fn count_by_action(&self) -> BTreeMap<ActionKind, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.lock().iter() {
            *counts.entry(record.action).or_insert(0) += 1;
        }
        counts
    }
}

/// Set of buyers that reached their terminal state.
#[derive(Debug, Default)]
pub struct CompletionSet {
    finished: Mutex<BTreeSet<AgentId>>,
}

impl CompletionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an agent as finished. Returns false if it already was.
    pub fn insert(&self, id: &AgentId) -> bool {
        self.finished.lock().insert(id.clone())
    }

    /// Returns true if the agent finished.
    #[must_use]
    pub fn contains(&self, id: &AgentId) -> bool {
        self.finished.lock().contains(id)
    }

    /// Number of finished agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.finished.lock().len()
    }

    /// Returns true if nobody finished yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finished.lock().is_empty()
    }
}

/// Where every agent sits on the grid.
///
/// Used for proximity lookups between sellers and for reporting.
#[derive(Debug, Default)]
pub struct LocationRegistry {
    buyers: RwLock<BTreeMap<AgentId, Location>>,
    sellers: RwLock<BTreeMap<AgentId, Location>>,
}

impl LocationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a buyer's location.
    pub fn register_buyer(&self, id: &AgentId, location: Location) {
        self.buyers.write().insert(id.clone(), location);
    }

    /// Records a seller's location.
    pub fn register_seller(&self, id: &AgentId, location: Location) {
        self.sellers.write().insert(id.clone(), location);
    }

    /// A seller's location.
    #[must_use]
    pub fn seller(&self, id: &AgentId) -> Option<Location> {
        self.sellers.read().get(id).copied()
    }

    /// Sellers within `radius` of `center` (inclusive), in identifier order.
    #[must_use]
    pub fn sellers_within(&self, center: &Location, radius: f64) -> Vec<AgentId> {
        self.sellers
            .read()
            .iter()
            .filter(|(_, loc)| center.distance_to(loc) <= radius)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Copy of all seller locations.
    #[must_use]
    pub fn sellers(&self) -> BTreeMap<AgentId, Location> {
        self.sellers.read().clone()
    }

    /// Copy of all buyer locations.
    #[must_use]
    pub fn buyers(&self) -> BTreeMap<AgentId, Location> {
        self.buyers.read().clone()
    }
}
