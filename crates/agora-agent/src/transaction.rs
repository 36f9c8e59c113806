//! Purchase execution.
//!
//! The mutation half ([`TransactionCoordinator::apply`]) runs on the buyer's
//! beliefs while the caller holds the belief lock. The settlement half
//! ([`TransactionCoordinator::settle`]) runs after the lock is released: it
//! appends the decision record under the log's own lock and reports the sale
//! to the seller.

use std::collections::BTreeMap;

use agora_core::{
    ActionKind, AgentId, DecisionLog, MarketConfig, ProductName, QuantityRange,
    SaleRecord, VariantId,
};
use agora_net::{MarketMessage, Transport};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use tracing::{debug, warn};

use crate::beliefs::{BeliefStore, BeliefValue, Beliefs, keys};
use crate::scorer::MarketScorer;

/// What to buy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseMode {
    /// Only the listed products.
    Priority {
        /// Indispensable products held below threshold.
        shortages: Vec<ProductName>,
    },
    /// Across the seller's whole catalog.
    General,
}

impl PurchaseMode {
    /// Decision kind recorded for this mode.
    #[must_use]
    pub const fn action(&self) -> ActionKind {
        match self {
            Self::Priority { .. } => ActionKind::PriorityPurchase,
            Self::General => ActionKind::GeneralPurchase,
        }
    }
}

/// Why a purchase did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// The buyer reached its purchase ceiling.
    LimitReached,
    /// No fresh offer to buy from.
    NoSeller,
}

/// The buyer-side result of a purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// Seller bought from.
    pub seller: AgentId,
    /// Units per variant.
    pub purchased: BTreeMap<VariantId, u32>,
    /// Purchase number after this one.
    pub purchase_number: u64,
    /// Shortage list for priority purchases.
    pub shortages: Option<Vec<ProductName>>,
    /// The sale as reported to the seller.
    pub sale: SaleRecord,
}

/// Outcome of [`TransactionCoordinator::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResult {
    /// Inventory and stock were updated and the sale reported.
    Completed {
        /// What was bought.
        receipt: Receipt,
        /// Sequence of the decision record.
        sequence: u64,
    },
    /// Nothing changed.
    NoOp(NoOpReason),
}

impl TransactionResult {
    /// Returns true if a purchase happened.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Executes buyer purchases.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    scorer: MarketScorer,
    max_purchases: u64,
    priority_quantity: QuantityRange,
    general_quantity: QuantityRange,
    offer_ttl: Duration,
}

impl TransactionCoordinator {
    /// Builds a coordinator from the market configuration.
    #[must_use]
    pub fn from_config(config: &MarketConfig) -> Self {
        Self {
            scorer: MarketScorer::new(config.weights, config.location_aware),
            max_purchases: u64::from(config.max_purchases),
            priority_quantity: config.priority_quantity,
            general_quantity: config.general_quantity,
            offer_ttl: config.timings.offer_ttl(),
        }
    }

    /// Mutates `beliefs` for one purchase.
    ///
    /// Stale offers are evicted first so the seller is always chosen from
    /// fresh offers. The chosen seller's cached stock is decremented
    /// alongside the buyer's inventory.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        buyer: &AgentId,
        beliefs: &mut Beliefs,
        mode: &PurchaseMode,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Receipt, NoOpReason> {
        let count = beliefs.count(keys::PURCHASE_COUNT);
        if count >= self.max_purchases {
            return Err(NoOpReason::LimitReached);
        }

        beliefs.evict_stale_sellers(now, self.offer_ttl);
        let location = beliefs.location(keys::LOCATION).unwrap_or_default();
        let ethics = beliefs.ethics(keys::ETHICS).cloned().unwrap_or_default();
        let best = beliefs
            .offers(keys::KNOWN_SELLERS)
            .and_then(|offers| self.scorer.select(&ethics, location, offers))
            .ok_or(NoOpReason::NoSeller)?;

        let (range, products): (QuantityRange, Option<&[ProductName]>) = match mode {
            PurchaseMode::Priority { shortages } => (self.priority_quantity, Some(shortages.as_slice())),
            PurchaseMode::General => (self.general_quantity, None),
        };

        let mut taken: Vec<(ProductName, VariantId, u32)> = Vec::new();
        beliefs.update_offers(keys::KNOWN_SELLERS, |offers| {
            let Some(offer) = offers.get_mut(&best.seller) else {
                return;
            };
            let wanted: Vec<ProductName> = match products {
                Some(list) => list.to_vec(),
                None => offer.products.iter().map(|(p, _)| p.clone()).collect(),
            };
            for product in wanted {
                let Some(entry) = offer.products.get_mut(&product) else {
                    continue;
                };
                if !entry.in_stock() {
                    continue;
                }
                let qty = rng.gen_range(range.as_range()).min(entry.stock);
                if qty == 0 {
                    continue;
                }
                entry.stock -= qty;
                taken.push((product, entry.variant.clone(), qty));
            }
        });

        let mut purchased = BTreeMap::new();
        beliefs.update_inventory(keys::INVENTORY, |inventory| {
            for (product, variant, qty) in &taken {
                *inventory.entry(product.clone()).or_insert(0) += qty;
                *purchased.entry(variant.clone()).or_insert(0) += qty;
            }
        });

        let purchase_number = count + 1;
        beliefs.set(keys::PURCHASE_COUNT, BeliefValue::Count(purchase_number));

        Ok(Receipt {
            sale: SaleRecord {
                client_id: buyer.clone(),
                action: mode.action(),
                purchased: purchased.clone(),
                timestamp: now,
            },
            seller: best.seller,
            purchased,
            purchase_number,
            shortages: match mode {
                PurchaseMode::Priority { shortages } => Some(shortages.clone()),
                PurchaseMode::General => None,
            },
        })
    }

    /// Records the purchase and reports it to the seller.
    ///
    /// A failed send is logged and not retried.
    pub async fn settle(
        &self,
        receipt: &Receipt,
        log: &DecisionLog,
        transport: &dyn Transport,
    ) -> u64 {
        let buyer = &receipt.sale.client_id;
        let mut payload = json!({
            "supermercado_elegido": receipt.seller,
            "productos_comprados": receipt.purchased,
            "numero_compra": receipt.purchase_number,
        });
        if let Some(shortages) = &receipt.shortages {
            payload["indispensables_faltantes"] = json!(shortages);
        }
        let sequence = log.append(buyer, receipt.sale.action, payload);

        let message = MarketMessage::Sale(receipt.sale.clone());
        if let Err(e) = transport.send(&receipt.seller, &message).await {
            warn!(buyer = %buyer, seller = %receipt.seller, error = %e, "sale report not delivered");
        }
        sequence
    }

    /// Runs a full purchase against a buyer's store.
    pub async fn execute<R: Rng>(
        &self,
        store: &BeliefStore,
        rng: &Mutex<R>,
        mode: PurchaseMode,
        log: &DecisionLog,
        transport: &dyn Transport,
    ) -> TransactionResult {
        let buyer = store.owner().clone();
        let applied = {
            let mut beliefs = store.lock().await;
            let mut rng = rng.lock();
            self.apply(&buyer, &mut beliefs, &mode, &mut *rng, Utc::now())
        };
        match applied {
            Ok(receipt) => {
                debug!(
                    buyer = %buyer,
                    seller = %receipt.seller,
                    action = %receipt.sale.action,
                    units = receipt.sale.total_units(),
                    "purchase"
                );
                let sequence = self.settle(&receipt, log, transport).await;
                TransactionResult::Completed { receipt, sequence }
            }
            Err(reason) => {
                debug!(buyer = %buyer, ?reason, "purchase skipped");
                TransactionResult::NoOp(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use agora_core::{Catalog, Location, Offer, VarietyTable};
    use agora_net::InProcessNetwork;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn buyer_beliefs(seller_stock: u32, received_at: DateTime<Utc>) -> Beliefs {
        let table = VarietyTable::standard();
        let mut catalog = Catalog::new();
        catalog.insert("Pan", table.entry_for("Pan_3", seller_stock).unwrap());
        catalog.insert("Leche", table.entry_for("Leche_1", seller_stock).unwrap());
        let mut beliefs = Beliefs::new()
            .with(keys::LOCATION, BeliefValue::Location(Location::new(10.0, 10.0)))
            .with(keys::PURCHASE_COUNT, BeliefValue::Count(0));
        beliefs.update_offers(keys::KNOWN_SELLERS, |offers| {
            offers.insert(AgentId::from("seller-1"), Offer::new(catalog, Location::new(0.0, 0.0), received_at));
        });
        beliefs
    }

    fn cached_stock(beliefs: &Beliefs, product: &str) -> u32 {
        beliefs.offers(keys::KNOWN_SELLERS).unwrap()[&AgentId::from("seller-1")]
            .products
            .get(product)
            .unwrap()
            .stock
    }

    #[test]
    fn priority_purchase_moves_stock_to_inventory() {
        let coordinator = TransactionCoordinator::from_config(&MarketConfig::default());
        let now = Utc::now();
        let mut beliefs = buyer_beliefs(10, now);
        let mut rng = StdRng::seed_from_u64(1);
        let mode = PurchaseMode::Priority { shortages: vec!["Pan".into()] };

        let receipt = coordinator
            .apply(&AgentId::from("buyer-1"), &mut beliefs, &mode, &mut rng, now)
            .unwrap();

        let qty = receipt.purchased["Pan_3"];
        assert!((2..=6).contains(&qty));
        assert_eq!(cached_stock(&beliefs, "Pan"), 10 - qty);
        assert_eq!(cached_stock(&beliefs, "Leche"), 10);
        assert_eq!(beliefs.inventory(keys::INVENTORY).unwrap()["Pan"], qty);
        assert_eq!(beliefs.count(keys::PURCHASE_COUNT), 1);
        assert_eq!(receipt.sale.action, ActionKind::PriorityPurchase);
    }

    #[test]
    fn general_purchase_capped_by_stock() {
        let coordinator = TransactionCoordinator::from_config(&MarketConfig::default());
        let now = Utc::now();
        let mut beliefs = buyer_beliefs(1, now);
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..20 {
            let _ = coordinator.apply(&AgentId::from("buyer-1"), &mut beliefs, &PurchaseMode::General, &mut rng, now);
        }
        let inventory = beliefs.inventory(keys::INVENTORY).cloned().unwrap_or_default();
        assert!(inventory.values().all(|q| *q <= 1));
        assert_eq!(cached_stock(&beliefs, "Pan") + inventory.get("Pan").copied().unwrap_or(0), 1);
    }

    #[test]
    fn limit_reached_is_noop() {
        let config = MarketConfig {
            max_purchases: 2,
            ..MarketConfig::default()
        };
        let coordinator = TransactionCoordinator::from_config(&config);
        let now = Utc::now();
        let mut beliefs = buyer_beliefs(50, now).with(keys::PURCHASE_COUNT, BeliefValue::Count(2));
        let before = beliefs.clone();
        let mut rng = StdRng::seed_from_u64(2);

        let result = coordinator.apply(&AgentId::from("buyer-1"), &mut beliefs, &PurchaseMode::General, &mut rng, now);
        assert_eq!(result.unwrap_err(), NoOpReason::LimitReached);
        assert_eq!(beliefs, before);
    }

    #[test]
    fn stale_offer_never_used() {
        let coordinator = TransactionCoordinator::from_config(&MarketConfig::default());
        let now = Utc::now();
        let mut beliefs = buyer_beliefs(50, now - Duration::seconds(30));
        let mut rng = StdRng::seed_from_u64(3);

        let result = coordinator.apply(&AgentId::from("buyer-1"), &mut beliefs, &PurchaseMode::General, &mut rng, now);
        assert_eq!(result.unwrap_err(), NoOpReason::NoSeller);
        assert_eq!(beliefs.count(keys::PURCHASE_COUNT), 0);
    }

    #[tokio::test]
    async fn execute_logs_and_reports_sale() {
        let network = InProcessNetwork::new();
        let buyer_end = network.register(AgentId::from("buyer-1"));
        let seller_end = network.register(AgentId::from("seller-1"));
        let store = BeliefStore::new(AgentId::from("buyer-1"), buyer_beliefs(10, Utc::now()));
        let log = DecisionLog::new();
        let rng = Mutex::new(StdRng::seed_from_u64(4));
        let coordinator = TransactionCoordinator::from_config(&MarketConfig::default());

        let result = coordinator
            .execute(&store, &rng, PurchaseMode::Priority { shortages: vec!["Pan".into()] }, &log, &buyer_end)
            .await;
        assert!(result.is_completed());

        let records = log.records_of(ActionKind::PriorityPurchase);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["supermercado_elegido"], "seller-1");
        assert_eq!(records[0].payload["indispensables_faltantes"], json!(["Pan"]));

        let envelope = seller_end.recv_timeout(StdDuration::from_millis(100)).await.unwrap();
        match envelope.open() {
            Some(MarketMessage::Sale(sale)) => assert_eq!(sale.client_id, AgentId::from("buyer-1")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_purchases_respect_ceiling() {
        let config = MarketConfig {
            max_purchases: 5,
            ..MarketConfig::default()
        };
        let network = InProcessNetwork::new();
        let buyer_end = Arc::new(network.register(AgentId::from("buyer-1")));
        let _seller_end = network.register(AgentId::from("seller-1"));
        let store = Arc::new(BeliefStore::new(AgentId::from("buyer-1"), buyer_beliefs(12, Utc::now())));
        let log = Arc::new(DecisionLog::new());
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(5)));
        let coordinator = Arc::new(TransactionCoordinator::from_config(&config));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let (store, log, rng, coordinator, end) =
                    (Arc::clone(&store), Arc::clone(&log), Arc::clone(&rng), Arc::clone(&coordinator), Arc::clone(&buyer_end));
                tokio::spawn(async move {
                    coordinator.execute(&store, &rng, PurchaseMode::General, &log, end.as_ref()).await
                })
            })
            .collect();
        let mut completed = 0;
        for handle in handles {
            if handle.await.unwrap().is_completed() {
                completed += 1;
            }
        }

        assert_eq!(completed, 5);
        assert_eq!(log.len(), 5);
        let beliefs = store.snapshot().await;
        assert_eq!(beliefs.count(keys::PURCHASE_COUNT), 5);
        let held = beliefs.inventory(keys::INVENTORY).cloned().unwrap_or_default();
        assert_eq!(cached_stock(&beliefs, "Pan") + held.get("Pan").copied().unwrap_or(0), 12);
    }

    proptest! {
        #[test]
        fn stock_is_conserved(stock in 0u32..30, rounds in 1usize..40, seed in any::<u64>()) {
            let config = MarketConfig { max_purchases: 25, ..MarketConfig::default() };
            let coordinator = TransactionCoordinator::from_config(&config);
            let now = Utc::now();
            let mut beliefs = buyer_beliefs(stock, now);
            let mut rng = StdRng::seed_from_u64(seed);
            for i in 0..rounds {
                let mode = if i % 2 == 0 {
                    PurchaseMode::Priority { shortages: vec!["Pan".into(), "Leche".into()] }
                } else {
                    PurchaseMode::General
                };
                let _ = coordinator.apply(&AgentId::from("buyer-1"), &mut beliefs, &mode, &mut rng, now);
            }
            let held = beliefs.inventory(keys::INVENTORY).cloned().unwrap_or_default();
            for product in ["Pan", "Leche"] {
                prop_assert_eq!(cached_stock(&beliefs, product) + held.get(product).copied().unwrap_or(0), stock);
            }
            prop_assert!(beliefs.count(keys::PURCHASE_COUNT) <= 25);
        }
    }
}
