//! Per-agent belief store.
//!
//! Beliefs are a string-keyed map of typed values. Readers get a default
//! when a key is missing or holds another type, so a lookup is never fatal.
//! Every mutation of one agent's beliefs goes through that agent's single
//! [`BeliefStore`] lock.

use std::collections::{BTreeMap, BTreeSet};

use agora_core::{AgentId, Catalog, EthicsVector, Location, Offer, ProductName, SaleRecord};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Well-known belief keys.
pub mod keys {
    /// Offers cached per seller (buyers).
    pub const KNOWN_SELLERS: &str = "known_sellers";
    /// Units held per product (buyers).
    pub const INVENTORY: &str = "inventory";
    /// Purchases made so far (buyers).
    pub const PURCHASE_COUNT: &str = "purchase_count";
    /// Ethical preferences (buyers).
    pub const ETHICS: &str = "ethical_values";
    /// Products the buyer must never run out of.
    pub const INDISPENSABLES: &str = "indispensables";
    /// Buys the usual varieties (buyers).
    pub const BUYS_USUAL: &str = "buys_usual";
    /// Terminal flag (buyers).
    pub const FINISHED: &str = "finished";
    /// Own location (every agent).
    pub const LOCATION: &str = "location";
    /// Own catalog (sellers).
    pub const CATALOG: &str = "catalog";
    /// Clients that asked for an offer since the last promotion (sellers).
    pub const CLIENTS: &str = "clients";
    /// Every sale received (standard sellers).
    pub const SALES_HISTORY: &str = "sales";
    /// Sales not yet forwarded to adaptive sellers (standard sellers).
    pub const PENDING_SALES: &str = "pending_sales";
    /// Own sales this epoch (adaptive sellers).
    pub const RECENT_SALES: &str = "recent_sales";
    /// Sales forwarded by standard sellers this epoch (adaptive sellers).
    pub const EPOCH_RECEIVED_SALES: &str = "epoch_received_sales";
    /// Every sale forwarded by standard sellers (adaptive sellers).
    pub const RECEIVED_SALES: &str = "received_sales";
    /// Last metrics received per peer (adaptive sellers).
    pub const PEER_METRICS: &str = "peer_metrics";
    /// Best epoch sale count so far (adaptive sellers).
    pub const MAX_SALES: &str = "max_sales";
    /// Catalog of the best epoch so far (adaptive sellers).
    pub const SUCCESSFUL_CATALOG: &str = "successful_catalog";
    /// Sale count of the previous epoch (adaptive sellers).
    pub const PREVIOUS_SALES: &str = "previous_sales";
}

/// A sale forwarded by a standard seller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedSale {
    /// Seller that made the sale.
    pub seller_id: AgentId,
    /// The sale.
    pub sale: SaleRecord,
}

/// Last metrics a peer broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerMetric {
    /// The peer's sales this epoch.
    pub recent_sales: Vec<SaleRecord>,
    /// The peer's catalog at broadcast time.
    pub catalog: Catalog,
    /// When the metrics arrived.
    pub received_at: DateTime<Utc>,
}

impl PeerMetric {
    /// Number of sales the peer reported.
    #[must_use]
    pub fn sale_count(&self) -> usize {
        self.recent_sales.len()
    }

    /// Returns true once the metrics are `ttl` old or older at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.received_at >= ttl
    }
}

/// A single belief.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BeliefValue {
    /// Boolean.
    Flag(bool),
    /// Counter.
    Count(u64),
    /// Point on the grid.
    Location(Location),
    /// Ethical weights.
    Ethics(EthicsVector),
    /// List of products.
    Products(Vec<ProductName>),
    /// Units per product.
    Inventory(BTreeMap<ProductName, u32>),
    /// A catalog.
    Catalog(Catalog),
    /// Offers per seller.
    Offers(BTreeMap<AgentId, Offer>),
    /// Set of agents.
    Agents(BTreeSet<AgentId>),
    /// Sale list.
    Sales(Vec<SaleRecord>),
    /// Forwarded sale list.
    ForwardedSales(Vec<ForwardedSale>),
    /// Metrics per peer.
    PeerMetrics(BTreeMap<AgentId, PeerMetric>),
}

macro_rules! typed_belief {
    ($variant:ident, $ty:ty, $get:ident, $update:ident) => {
        #[doc = concat!("Reads a `", stringify!($variant), "` belief.")]
        #[must_use]
        pub fn $get(&self, key: &str) -> Option<&$ty> {
            match self.entries.get(key) {
                Some(BeliefValue::$variant(value)) => Some(value),
                _ => None,
            }
        }

        #[doc = concat!("Mutates a `", stringify!($variant), "` belief, starting from its default when absent.")]
        pub fn $update<R>(&mut self, key: &str, f: impl FnOnce(&mut $ty) -> R) -> R {
            let mut value = match self.entries.remove(key) {
                Some(BeliefValue::$variant(value)) => value,
                _ => <$ty>::default(),
            };
            let result = f(&mut value);
            self.entries.insert(key.to_owned(), BeliefValue::$variant(value));
            result
        }
    };
}

/// One agent's beliefs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Beliefs {
    entries: BTreeMap<String, BeliefValue>,
}

impl Beliefs {
    /// Empty beliefs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BeliefValue> {
        self.entries.get(key)
    }

    /// Inserts or overwrites a belief.
    pub fn set(&mut self, key: impl Into<String>, value: BeliefValue) {
        self.entries.insert(key.into(), value);
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: BeliefValue) -> Self {
        self.set(key, value);
        self
    }

    /// Removes a belief.
    pub fn remove(&mut self, key: &str) -> Option<BeliefValue> {
        self.entries.remove(key)
    }

    /// Belief keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Counter value, 0 when absent.
    #[must_use]
    pub fn count(&self, key: &str) -> u64 {
        match self.entries.get(key) {
            Some(BeliefValue::Count(n)) => *n,
            _ => 0,
        }
    }

    /// Flag value, false when absent.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(BeliefValue::Flag(true)))
    }

    /// Location value.
    #[must_use]
    pub fn location(&self, key: &str) -> Option<Location> {
        match self.entries.get(key) {
            Some(BeliefValue::Location(loc)) => Some(*loc),
            _ => None,
        }
    }

    typed_belief!(Ethics, EthicsVector, ethics, update_ethics);
    typed_belief!(Products, Vec<ProductName>, products, update_products);
    typed_belief!(Inventory, BTreeMap<ProductName, u32>, inventory, update_inventory);
    typed_belief!(Catalog, Catalog, catalog, update_catalog);
    typed_belief!(Offers, BTreeMap<AgentId, Offer>, offers, update_offers);
    typed_belief!(Agents, BTreeSet<AgentId>, agents, update_agents);
    typed_belief!(Sales, Vec<SaleRecord>, sales, update_sales);
    typed_belief!(ForwardedSales, Vec<ForwardedSale>, forwarded_sales, update_forwarded_sales);
    typed_belief!(PeerMetrics, BTreeMap<AgentId, PeerMetric>, peer_metrics, update_peer_metrics);

    /// Drops every cached offer that is `ttl` old or older at `now`.
    ///
    /// Returns the sellers evicted.
    pub fn evict_stale_sellers(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<AgentId> {
        self.update_offers(keys::KNOWN_SELLERS, |offers| {
            let stale: Vec<AgentId> = offers
                .iter()
                .filter(|(_, offer)| offer.is_stale(now, ttl))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                offers.remove(id);
            }
            stale
        })
    }

    /// Drops every peer metric that is `ttl` old or older at `now`.
    ///
    /// Returns the peers evicted.
    pub fn evict_stale_peer_metrics(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<AgentId> {
        self.update_peer_metrics(keys::PEER_METRICS, |metrics| {
            let stale: Vec<AgentId> = metrics
                .iter()
                .filter(|(_, metric)| metric.is_stale(now, ttl))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                metrics.remove(id);
            }
            stale
        })
    }
}

/// Lock-guarded beliefs of one agent.
#[derive(Debug)]
pub struct BeliefStore {
    owner: AgentId,
    beliefs: Mutex<Beliefs>,
}

impl BeliefStore {
    /// Wraps initial beliefs.
    #[must_use]
    pub fn new(owner: AgentId, initial: Beliefs) -> Self {
        Self {
            owner,
            beliefs: Mutex::new(initial),
        }
    }

    /// The owning agent.
    #[must_use]
    pub const fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Reads one belief.
    pub async fn get(&self, key: &str) -> Option<BeliefValue> {
        self.beliefs.lock().await.get(key).cloned()
    }

    /// Writes one belief.
    pub async fn set(&self, key: impl Into<String>, value: BeliefValue) {
        self.beliefs.lock().await.set(key, value);
    }

    /// Holds the lock for a multi-step update.
    pub async fn lock(&self) -> MutexGuard<'_, Beliefs> {
        self.beliefs.lock().await
    }

    /// Caches a seller's offer, replacing any older one.
    pub async fn record_offer(&self, seller: AgentId, offer: Offer) {
        self.beliefs
            .lock()
            .await
            .update_offers(keys::KNOWN_SELLERS, |offers| {
                offers.insert(seller, offer);
            });
    }

    /// Evicts stale offers under the lock. Returns how many were dropped.
    pub async fn evict_stale_sellers(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let evicted = self.beliefs.lock().await.evict_stale_sellers(now, ttl);
        if !evicted.is_empty() {
            debug!(agent = %self.owner, evicted = evicted.len(), "evicted stale offers");
        }
        evicted.len()
    }

    /// Copy of the current beliefs.
    pub async fn snapshot(&self) -> Beliefs {
        self.beliefs.lock().await.clone()
    }
}
