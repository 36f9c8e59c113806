//! Core market types: identities, locations, catalogs, offers and sales.
//!
//! Wire field names follow the market's JSON protocol (`variedad`,
//! `productos_comprados`, ...) while the Rust names stay descriptive.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::ActionKind;

/// Name of a product line (e.g. `"Pan"`).
pub type ProductName = String;

/// Identifier of a concrete variant of a product (e.g. `"Pan_3"`).
pub type VariantId = String;

/// Ethical criterion → weight. Both buyer preferences and variant profiles use it.
pub type EthicsVector = BTreeMap<String, f64>;

/// Stable identity of an agent on the market.
///
/// Ordering is lexicographic; every tie-break in the market iterates agents
/// in this order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates an agent identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A point on the market grid. Serialized as a `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Location {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another location.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f64, f64)> for Location {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl From<Location> for (f64, f64) {
    fn from(loc: Location) -> Self {
        (loc.x, loc.y)
    }
}

/// One product line as stocked by a seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Variant currently on the shelf.
    #[serde(rename = "variedad")]
    pub variant: VariantId,
    /// Units in stock.
    pub stock: u32,
    /// Fixed ethics profile of the current variant.
    #[serde(flatten)]
    pub ethics: EthicsVector,
}

impl CatalogEntry {
    /// Creates a catalog entry.
    #[must_use]
    pub fn new(variant: impl Into<VariantId>, stock: u32, ethics: EthicsVector) -> Self {
        Self {
            variant: variant.into(),
            stock,
            ethics,
        }
    }

    /// Returns true if at least one unit is available.
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// A seller's assortment, keyed by product name.
///
/// The authoritative copy lives with the seller; buyers hold snapshots
/// inside [`Offer`]s. Cloning is a deep copy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<ProductName, CatalogEntry>);

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the entry for a product.
    #[must_use]
    pub fn get(&self, product: &str) -> Option<&CatalogEntry> {
        self.0.get(product)
    }

    /// Returns a mutable entry for a product.
    pub fn get_mut(&mut self, product: &str) -> Option<&mut CatalogEntry> {
        self.0.get_mut(product)
    }

    /// Inserts or replaces a product line, returning the previous entry.
    pub fn insert(
        &mut self,
        product: impl Into<ProductName>,
        entry: CatalogEntry,
    ) -> Option<CatalogEntry> {
        self.0.insert(product.into(), entry)
    }

    /// Iterates product lines in product-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProductName, &CatalogEntry)> {
        self.0.iter()
    }

    /// Iterates product lines mutably in product-name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ProductName, &mut CatalogEntry)> {
        self.0.iter_mut()
    }

    /// Number of product lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the catalog carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Products whose stock fell strictly below `floor`.
    #[must_use]
    pub fn low_stock_products(&self, floor: u32) -> Vec<ProductName> {
        self.0
            .iter()
            .filter(|(_, entry)| entry.stock < floor)
            .map(|(product, _)| product.clone())
            .collect()
    }

    /// Removes up to `qty` units of a product, never going below zero.
    ///
    /// Returns the number of units actually removed.
    pub fn take_stock(&mut self, product: &str, qty: u32) -> u32 {
        match self.0.get_mut(product) {
            Some(entry) => {
                let taken = qty.min(entry.stock);
                entry.stock -= taken;
                taken
            }
            None => 0,
        }
    }

    /// Total units across all product lines.
    #[must_use]
    pub fn total_stock(&self) -> u64 {
        self.0.values().map(|e| u64::from(e.stock)).sum()
    }
}

impl FromIterator<(ProductName, CatalogEntry)> for Catalog {
    fn from_iter<I: IntoIterator<Item = (ProductName, CatalogEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A seller's advertised state as cached by one buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Snapshot of the seller's catalog.
    pub products: Catalog,
    /// Seller location.
    pub location: Location,
    /// When the buyer received this snapshot.
    pub received_at: DateTime<Utc>,
}

impl Offer {
    /// Creates an offer received at `received_at`.
    #[must_use]
    pub const fn new(products: Catalog, location: Location, received_at: DateTime<Utc>) -> Self {
        Self {
            products,
            location,
            received_at,
        }
    }

    /// Age of this offer at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.received_at
    }

    /// Returns true once the offer is `ttl` old or older.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) >= ttl
    }
}

/// A completed purchase as reported by the buyer to the seller (`venta`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    /// The buying agent.
    #[serde(rename = "cliente_id")]
    pub client_id: AgentId,
    /// Purchase kind.
    #[serde(rename = "accion")]
    pub action: ActionKind,
    /// Units bought per variant.
    #[serde(rename = "productos_comprados", default)]
    pub purchased: BTreeMap<VariantId, u32>,
    /// When the purchase was made.
    pub timestamp: DateTime<Utc>,
}

impl SaleRecord {
    /// Total units in this sale.
    #[must_use]
    pub fn total_units(&self) -> u64 {
        self.purchased.values().map(|q| u64::from(*q)).sum()
    }
}
