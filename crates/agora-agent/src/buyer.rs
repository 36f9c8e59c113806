//! Buyer agents.
//!
//! A buyer asks every seller for an offer each cycle, caches the replies,
//! and then pursues the first unsatisfied desire:
//!
//! 1. `maintain_indispensables`: restock indispensable products held below
//!    the threshold;
//! 2. `basic_inventory`: shop generally while inventory is low;
//! 3. `limit_purchases`: at the purchase ceiling, consume until nothing is
//!    left, then finish;
//! 4. `finish_consumption` (fallback): consume, or finish when nothing is left.

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_core::{
    ActionKind, AgentId, ETHICS_CRITERIA, EthicsVector, Location, MarketConfig, Offer,
    ProductName, VarietyTable, variety::round2,
};
use agora_net::{MarketMessage, Transport};
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use serde_json::json;
use tracing::{debug, info};

use crate::beliefs::{BeliefStore, BeliefValue, Beliefs, keys};
use crate::context::MarketContext;
use crate::desire::{DesireSet, Intention, Plan};
use crate::scheduler::{Deliberator, MessageHandler, TaskSet};
use crate::transaction::{PurchaseMode, TransactionCoordinator, TransactionResult};

/// Plans a buyer can dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuyerPlan {
    /// Buy the listed indispensable products.
    PriorityPurchase {
        /// Products held below threshold.
        shortages: Vec<ProductName>,
    },
    /// Buy across the best seller's catalog.
    GeneralPurchase,
    /// Use up one unit of everything held.
    Consume,
    /// Consume what is left and leave the market.
    Finish,
}

impl Plan for BuyerPlan {
    fn label(&self) -> &'static str {
        match self {
            Self::PriorityPurchase { .. } => "priority_purchase",
            Self::GeneralPurchase => "general_purchase",
            Self::Consume => "consume",
            Self::Finish => "finish",
        }
    }
}

/// What a buyer deliberates over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyerSituation {
    /// Purchases made.
    pub purchase_count: u64,
    /// Purchase ceiling.
    pub max_purchases: u64,
    /// Indispensable products held below threshold.
    pub shortages: Vec<ProductName>,
    /// Units held across all products.
    pub total_inventory: u64,
    /// Inventory below which the buyer shops generally.
    pub basic_inventory_min: u64,
}

impl BuyerSituation {
    /// Reads the situation from beliefs.
    #[must_use]
    pub fn observe(beliefs: &Beliefs, config: &MarketConfig) -> Self {
        let empty = BTreeMap::new();
        let inventory = beliefs.inventory(keys::INVENTORY).unwrap_or(&empty);
        let shortages = beliefs
            .products(keys::INDISPENSABLES)
            .map(|list| {
                list.iter()
                    .filter(|p| inventory.get(*p).copied().unwrap_or(0) < config.indispensable_threshold)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            purchase_count: beliefs.count(keys::PURCHASE_COUNT),
            max_purchases: u64::from(config.max_purchases),
            shortages,
            total_inventory: inventory.values().map(|q| u64::from(*q)).sum(),
            basic_inventory_min: u64::from(config.basic_inventory_min),
        }
    }

    const fn can_buy(&self) -> bool {
        self.purchase_count < self.max_purchases
    }
}

/// The buyer's desires in priority order.
#[must_use]
pub fn buyer_desires() -> DesireSet<BuyerSituation, BuyerPlan> {
    DesireSet::new("finish_consumption", |s: &BuyerSituation| {
        if s.total_inventory > 0 {
            BuyerPlan::Consume
        } else {
            BuyerPlan::Finish
        }
    })
    .with_desire("maintain_indispensables", |s| {
        (s.can_buy() && !s.shortages.is_empty()).then(|| BuyerPlan::PriorityPurchase {
            shortages: s.shortages.clone(),
        })
    })
    .with_desire("basic_inventory", |s| {
        (s.can_buy() && s.total_inventory < s.basic_inventory_min).then_some(BuyerPlan::GeneralPurchase)
    })
    .with_desire("limit_purchases", |s| {
        (!s.can_buy()).then_some(if s.total_inventory > 0 {
            BuyerPlan::Consume
        } else {
            BuyerPlan::Finish
        })
    })
}

/// Fixed traits a buyer is born with.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyerProfile {
    /// Where the buyer lives.
    pub location: Location,
    /// Ethical preferences.
    pub ethics: EthicsVector,
    /// Products the buyer must keep stocked.
    pub indispensables: Vec<ProductName>,
    /// Sticks to the usual varieties.
    pub buys_usual: bool,
}

impl BuyerProfile {
    /// Draws a random profile.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, config: &MarketConfig, varieties: &VarietyTable) -> Self {
        let grid = f64::from(config.grid_size);
        let location = Location::new(rng.gen_range(0.0..=grid), rng.gen_range(0.0..=grid));
        let ethics = ETHICS_CRITERIA
            .iter()
            .map(|c| ((*c).to_string(), round2(rng.gen_range(0.0..=1.0))))
            .collect();
        let mut indispensables: Vec<ProductName> = varieties
            .products()
            .cloned()
            .choose_multiple(&mut *rng, config.indispensable_count);
        indispensables.sort();
        Self {
            location,
            ethics,
            indispensables,
            buys_usual: rng.gen_bool(0.5),
        }
    }

    /// Initial beliefs for this profile: zero inventory for every product.
    #[must_use]
    pub fn beliefs(&self, varieties: &VarietyTable) -> Beliefs {
        let inventory = varieties.products().map(|p| (p.clone(), 0)).collect();
        Beliefs::new()
            .with(keys::LOCATION, BeliefValue::Location(self.location))
            .with(keys::ETHICS, BeliefValue::Ethics(self.ethics.clone()))
            .with(keys::INDISPENSABLES, BeliefValue::Products(self.indispensables.clone()))
            .with(keys::BUYS_USUAL, BeliefValue::Flag(self.buys_usual))
            .with(keys::INVENTORY, BeliefValue::Inventory(inventory))
            .with(keys::PURCHASE_COUNT, BeliefValue::Count(0))
            .with(keys::FINISHED, BeliefValue::Flag(false))
            .with(keys::KNOWN_SELLERS, BeliefValue::Offers(BTreeMap::new()))
    }
}

/// A buyer agent.
pub struct Buyer {
    id: AgentId,
    store: BeliefStore,
    ctx: MarketContext,
    transport: Arc<dyn Transport>,
    sellers: Vec<AgentId>,
    rng: Mutex<StdRng>,
    coordinator: TransactionCoordinator,
    desires: DesireSet<BuyerSituation, BuyerPlan>,
}

impl std::fmt::Debug for Buyer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buyer")
            .field("id", &self.id)
            .field("sellers", &self.sellers.len())
            .finish_non_exhaustive()
    }
}

impl Buyer {
    /// Creates a buyer and registers its location.
    #[must_use]
    pub fn new(
        profile: &BuyerProfile,
        ctx: MarketContext,
        transport: Arc<dyn Transport>,
        sellers: Vec<AgentId>,
        rng: StdRng,
    ) -> Self {
        let id = transport.local_id().clone();
        ctx.locations.register_buyer(&id, profile.location);
        Self {
            store: BeliefStore::new(id.clone(), profile.beliefs(&ctx.varieties)),
            coordinator: TransactionCoordinator::from_config(&ctx.config),
            desires: buyer_desires(),
            id,
            ctx,
            transport,
            sellers,
            rng: Mutex::new(rng),
        }
    }

    /// Agent identity.
    #[must_use]
    pub const fn id(&self) -> &AgentId {
        &self.id
    }

    /// The belief store.
    #[must_use]
    pub const fn beliefs(&self) -> &BeliefStore {
        &self.store
    }

    /// Starts the deliberation and receive tasks.
    pub fn spawn(self: &Arc<Self>) -> TaskSet {
        let timings = &self.ctx.config.timings;
        let mut tasks = TaskSet::new(self.id.clone());
        tasks.spawn_receiver(Arc::clone(self), Arc::clone(&self.transport), timings.receive_timeout());
        tasks.spawn_deliberation(Arc::clone(self), timings.buyer_cycle());
        tasks
    }

    /// Runs one purchase.
    pub async fn purchase(&self, mode: PurchaseMode) -> TransactionResult {
        self.coordinator
            .execute(&self.store, &self.rng, mode, &self.ctx.log, self.transport.as_ref())
            .await
    }

    /// Consumes one unit of every product held.
    pub async fn consume(&self) {
        let (consumed, purchase_number) = {
            let mut beliefs = self.store.lock().await;
            let consumed = beliefs.update_inventory(keys::INVENTORY, consume_one_each);
            (consumed, beliefs.count(keys::PURCHASE_COUNT))
        };
        debug!(buyer = %self.id, products = consumed.len(), "consumed");
        self.ctx.log.append(
            &self.id,
            ActionKind::Consumption,
            json!({ "productos_consumidos": consumed, "numero_compra": purchase_number }),
        );
    }

    /// Consumes what is left and leaves the market. Repeat calls do nothing.
    pub async fn finish(&self) {
        let (leftover, consumed, purchase_number) = {
            let mut beliefs = self.store.lock().await;
            if beliefs.flag(keys::FINISHED) {
                return;
            }
            beliefs.set(keys::FINISHED, BeliefValue::Flag(true));
            let leftover = beliefs.inventory(keys::INVENTORY).cloned().unwrap_or_default();
            let consumed = beliefs.update_inventory(keys::INVENTORY, consume_one_each);
            (leftover, consumed, beliefs.count(keys::PURCHASE_COUNT))
        };

        if !consumed.is_empty() {
            self.ctx.log.append(
                &self.id,
                ActionKind::Consumption,
                json!({
                    "productos_consumidos": consumed,
                    "inventario_previo": leftover,
                    "numero_compra": purchase_number,
                }),
            );
        }
        self.ctx
            .log
            .append(&self.id, ActionKind::Finished, json!({ "numero_compra": purchase_number }));
        self.ctx.completions.insert(&self.id);
        info!(buyer = %self.id, purchases = purchase_number, "buyer finished");
    }
}

fn consume_one_each(inventory: &mut BTreeMap<ProductName, u32>) -> BTreeMap<ProductName, u32> {
    let mut consumed = BTreeMap::new();
    for (product, qty) in inventory.iter_mut().filter(|(_, q)| **q > 0) {
        *qty -= 1;
        consumed.insert(product.clone(), 1);
    }
    consumed
}

impl Deliberator for Buyer {
    type Plan = BuyerPlan;

    fn id(&self) -> &AgentId {
        &self.id
    }

    async fn is_active(&self) -> bool {
        !self.store.lock().await.flag(keys::FINISHED)
    }

    async fn revise(&self) {
        self.store
            .evict_stale_sellers(Utc::now(), self.ctx.config.timings.offer_ttl())
            .await;
    }

    async fn solicit(&self) {
        let request = MarketMessage::request();
        self.transport.broadcast(&self.sellers, &request).await;
    }

    async fn deliberate(&self) -> Option<Intention<BuyerPlan>> {
        let beliefs = self.store.lock().await;
        if beliefs.flag(keys::FINISHED) {
            return None;
        }
        let situation = BuyerSituation::observe(&beliefs, &self.ctx.config);
        drop(beliefs);
        Some(self.desires.deliberate(&situation))
    }

    async fn execute(self: Arc<Self>, plan: BuyerPlan) {
        match plan {
            BuyerPlan::PriorityPurchase { shortages } => {
                self.purchase(PurchaseMode::Priority { shortages }).await;
            }
            BuyerPlan::GeneralPurchase => {
                self.purchase(PurchaseMode::General).await;
            }
            BuyerPlan::Consume => self.consume().await,
            BuyerPlan::Finish => self.finish().await,
        }
    }
}

impl MessageHandler for Buyer {
    async fn handle(&self, from: AgentId, message: MarketMessage) {
        match message {
            MarketMessage::OfferRequest {
                products: Some(products),
                location: Some(location),
            } => {
                self.store
                    .record_offer(from, Offer::new(products, location, Utc::now()))
                    .await;
            }
            other => {
                debug!(buyer = %self.id, from = %from, tipo = other.kind(), "ignoring message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::Catalog;
    use agora_net::InProcessNetwork;
    use crate::scheduler::run_cycle;
    use rand::SeedableRng;
    use std::time::Duration;
    use test_case::test_case;
    use tokio_util::sync::CancellationToken;

    fn situation(count: u64, shortages: &[&str], total: u64) -> BuyerSituation {
        BuyerSituation {
            purchase_count: count,
            max_purchases: 10,
            shortages: shortages.iter().map(|s| (*s).to_string()).collect(),
            total_inventory: total,
            basic_inventory_min: 8,
        }
    }

    #[test_case(situation(0, &["Pan"], 0), "maintain_indispensables", "priority_purchase" ; "shortage first")]
    #[test_case(situation(0, &[], 3), "basic_inventory", "general_purchase" ; "low inventory")]
    #[test_case(situation(0, &[], 8), "finish_consumption", "consume" ; "enough stock consumes")]
    #[test_case(situation(10, &["Pan"], 5), "limit_purchases", "consume" ; "ceiling reached with stock")]
    #[test_case(situation(10, &["Pan"], 0), "limit_purchases", "finish" ; "ceiling reached and exhausted")]
    #[test_case(situation(3, &[], 20), "finish_consumption", "consume" ; "plenty held")]
    fn desire_priority(s: BuyerSituation, desire: &str, plan: &str) {
        let intention = buyer_desires().deliberate(&s);
        assert_eq!(intention.desire, desire);
        assert_eq!(intention.plan_label(), plan);
    }

    #[test]
    fn fallback_finishes_when_empty() {
        let s = BuyerSituation {
            basic_inventory_min: 0,
            ..situation(0, &[], 0)
        };
        assert_eq!(buyer_desires().deliberate(&s).plan, BuyerPlan::Finish);
    }

    #[test]
    fn observe_computes_shortages_against_threshold() {
        let profile = BuyerProfile {
            location: Location::default(),
            ethics: EthicsVector::new(),
            indispensables: vec!["Leche".into(), "Pan".into()],
            buys_usual: false,
        };
        let mut beliefs = profile.beliefs(&VarietyTable::standard());
        beliefs.update_inventory(keys::INVENTORY, |inv| {
            inv.insert("Leche".into(), 2);
            inv.insert("Pan".into(), 1);
        });
        let s = BuyerSituation::observe(&beliefs, &MarketConfig::default());
        assert_eq!(s.shortages, vec!["Pan".to_string()]);
        assert_eq!(s.total_inventory, 3);
    }

    #[test]
    fn random_profile_shape() {
        let config = MarketConfig::default();
        let profile = BuyerProfile::random(&mut StdRng::seed_from_u64(3), &config, &VarietyTable::standard());
        assert_eq!(profile.indispensables.len(), 3);
        assert_eq!(profile.ethics.len(), ETHICS_CRITERIA.len());
        assert!(profile.ethics.values().all(|v| (0.0..=1.0).contains(v)));
        assert!(profile.location.x <= 100.0 && profile.location.y <= 100.0);
    }

    fn buyer(ctx: &MarketContext, network: &Arc<InProcessNetwork>) -> Arc<Buyer> {
        let profile = BuyerProfile {
            location: Location::new(5.0, 5.0),
            ethics: EthicsVector::new(),
            indispensables: vec!["Pan".into()],
            buys_usual: true,
        };
        let transport: Arc<dyn Transport> = Arc::new(network.register(AgentId::from("buyer-1")));
        Arc::new(Buyer::new(
            &profile,
            ctx.clone(),
            transport,
            vec![AgentId::from("seller-1")],
            StdRng::seed_from_u64(1),
        ))
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let buyer = buyer(&ctx, &network);
        buyer.beliefs().lock().await.update_inventory(keys::INVENTORY, |inv| {
            inv.insert("Pan".into(), 1);
        });

        buyer.finish().await;
        buyer.finish().await;

        assert_eq!(ctx.completions.len(), 1);
        assert_eq!(ctx.log.records_of(ActionKind::Finished).len(), 1);
        assert_eq!(ctx.log.records_of(ActionKind::Consumption).len(), 1);
        let beliefs = buyer.beliefs().snapshot().await;
        assert_eq!(beliefs.inventory(keys::INVENTORY).unwrap()["Pan"], 0);
        assert!(buyer.deliberate().await.is_none());
    }

    #[tokio::test]
    async fn finished_buyer_stays_silent() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let seller = network.register(AgentId::from("seller-1"));
        let buyer = buyer(&ctx, &network);

        assert!(buyer.is_active().await);
        buyer.finish().await;
        assert!(!buyer.is_active().await);

        let token = CancellationToken::new();
        assert!(run_cycle(&buyer, &token).await.is_none());
        assert!(seller.recv_timeout(Duration::from_millis(50)).await.is_none());
        assert_eq!(ctx.log.records_of(ActionKind::Finished).len(), 1);
    }

    #[tokio::test]
    async fn consume_decrements_held_products() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let buyer = buyer(&ctx, &network);
        buyer.beliefs().lock().await.update_inventory(keys::INVENTORY, |inv| {
            inv.insert("Pan".into(), 3);
            inv.insert("Leche".into(), 1);
        });

        buyer.consume().await;
        let beliefs = buyer.beliefs().snapshot().await;
        let inventory = beliefs.inventory(keys::INVENTORY).unwrap();
        assert_eq!(inventory["Pan"], 2);
        assert_eq!(inventory["Leche"], 0);
        let record = &ctx.log.records_of(ActionKind::Consumption)[0];
        assert_eq!(record.payload["productos_consumidos"]["Pan"], 1);
    }

    #[tokio::test]
    async fn offer_reply_is_cached() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let buyer = buyer(&ctx, &network);

        buyer
            .handle(AgentId::from("seller-1"), MarketMessage::offer(Catalog::new(), Location::new(1.0, 2.0)))
            .await;
        buyer.handle(AgentId::from("seller-2"), MarketMessage::request()).await;

        let beliefs = buyer.beliefs().snapshot().await;
        let offers = beliefs.offers(keys::KNOWN_SELLERS).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[&AgentId::from("seller-1")].location, Location::new(1.0, 2.0));
    }
}
