//! Standard sellers.
//!
//! A standard seller answers offer requests, books sales, forwards them to
//! the adaptive sellers after a short delay, and keeps its assortment fresh
//! by rotating varieties when stock runs low, periodically, and every Nth
//! sale.

use std::sync::Arc;

use agora_core::{AgentId, Catalog, Location, MarketConfig, SaleRecord, VarietyTable};
use agora_net::{MarketMessage, Transport};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::beliefs::{BeliefStore, BeliefValue, Beliefs, keys};
use crate::context::MarketContext;
use crate::desire::{DesireSet, Intention, Plan};
use crate::rotation::{RotationTrigger, VarietyRotator, has_low_stock};
use crate::scheduler::{Deliberator, MessageHandler, TaskSet};

/// Where a seller stands and what it stocks at start.
#[derive(Debug, Clone, PartialEq)]
pub struct SellerProfile {
    /// Store location.
    pub location: Location,
    /// Initial catalog.
    pub catalog: Catalog,
}

impl SellerProfile {
    /// Draws a random location and one random variant per product.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, config: &MarketConfig, varieties: &VarietyTable) -> Self {
        let grid = f64::from(config.grid_size);
        let location = Location::new(rng.gen_range(0.0..=grid), rng.gen_range(0.0..=grid));
        Self {
            location,
            catalog: varieties.random_catalog(rng, config.initial_stock.as_range()),
        }
    }

    /// Initial beliefs shared by both seller roles.
    #[must_use]
    pub fn beliefs(&self) -> Beliefs {
        Beliefs::new()
            .with(keys::LOCATION, BeliefValue::Location(self.location))
            .with(keys::CATALOG, BeliefValue::Catalog(self.catalog.clone()))
            .with(keys::CLIENTS, BeliefValue::Agents(std::collections::BTreeSet::new()))
    }
}

/// Removes sold units from the catalog, resolving each variant to its product.
///
/// Units for variants the table does not know are ignored. Returns the units
/// actually removed.
pub fn book_sale(catalog: &mut Catalog, sale: &SaleRecord, varieties: &VarietyTable) -> u64 {
    sale.purchased
        .iter()
        .filter_map(|(variant, qty)| {
            let product = varieties.product_of(variant)?;
            Some(u64::from(catalog.take_stock(product, *qty)))
        })
        .sum()
}

/// Notes `client` and replies with the current catalog and location.
pub(crate) async fn answer_request(store: &BeliefStore, transport: &dyn Transport, client: AgentId) {
    let reply = {
        let mut beliefs = store.lock().await;
        beliefs.update_agents(keys::CLIENTS, |clients| clients.insert(client.clone()));
        MarketMessage::offer(
            beliefs.catalog(keys::CATALOG).cloned().unwrap_or_default(),
            beliefs.location(keys::LOCATION).unwrap_or_default(),
        )
    };
    if let Err(e) = transport.send(&client, &reply).await {
        debug!(seller = %store.owner(), client = %client, error = %e, "offer reply not delivered");
    }
}

/// Plans a standard seller can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellerPlan {
    /// Rotate varieties because stock is low.
    RotateVarieties,
    /// Promote to win new clients.
    Promote,
    /// Nothing to do.
    Idle,
}

impl Plan for SellerPlan {
    fn label(&self) -> &'static str {
        match self {
            Self::RotateVarieties => "rotate_varieties",
            Self::Promote => "promote",
            Self::Idle => "idle",
        }
    }
}

/// What a standard seller deliberates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellerSituation {
    /// Some product is below the stock floor.
    pub low_stock: bool,
    /// Clients seen since the last promotion.
    pub known_clients: usize,
    /// Fewer clients than this triggers a promotion.
    pub min_clients: usize,
}

/// The standard seller's desires in priority order.
#[must_use]
pub fn seller_desires() -> DesireSet<SellerSituation, SellerPlan> {
    DesireSet::new("idle", |_: &SellerSituation| SellerPlan::Idle)
        .with_desire("sell_products", |s| s.low_stock.then_some(SellerPlan::RotateVarieties))
        .with_desire("attract_customers", |s| {
            (s.known_clients < s.min_clients).then_some(SellerPlan::Promote)
        })
}

/// A standard seller.
pub struct StandardSeller {
    id: AgentId,
    store: BeliefStore,
    ctx: MarketContext,
    transport: Arc<dyn Transport>,
    adaptive_peers: Vec<AgentId>,
    rng: Mutex<StdRng>,
    rotator: VarietyRotator,
    desires: DesireSet<SellerSituation, SellerPlan>,
}

impl std::fmt::Debug for StandardSeller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardSeller")
            .field("id", &self.id)
            .field("adaptive_peers", &self.adaptive_peers)
            .finish_non_exhaustive()
    }
}

impl StandardSeller {
    /// Creates a seller and registers its location.
    #[must_use]
    pub fn new(
        profile: &SellerProfile,
        ctx: MarketContext,
        transport: Arc<dyn Transport>,
        adaptive_peers: Vec<AgentId>,
        rng: StdRng,
    ) -> Self {
        let id = transport.local_id().clone();
        ctx.locations.register_seller(&id, profile.location);
        let beliefs = profile
            .beliefs()
            .with(keys::SALES_HISTORY, BeliefValue::Sales(Vec::new()))
            .with(keys::PENDING_SALES, BeliefValue::Sales(Vec::new()));
        Self {
            store: BeliefStore::new(id.clone(), beliefs),
            rotator: VarietyRotator::new(Arc::clone(&ctx.varieties)),
            desires: seller_desires(),
            id,
            ctx,
            transport,
            adaptive_peers,
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

    /// Starts the receive, deliberation, forwarding and rotation tasks.
    pub fn spawn(self: &Arc<Self>) -> TaskSet {
        let config = &self.ctx.config;
        let mut tasks = TaskSet::new(self.id.clone());
        tasks.spawn_receiver(Arc::clone(self), Arc::clone(&self.transport), config.timings.receive_timeout());
        tasks.spawn_deliberation(Arc::clone(self), config.timings.seller_cycle());

        let forwarder = Arc::clone(self);
        tasks.spawn_periodic("forward_sales", config.timings.sales_forward_delay(), move || {
            let seller = Arc::clone(&forwarder);
            async move {
                seller.forward_pending().await;
            }
        });

        if config.variety_change_enabled {
            let rotator = Arc::clone(self);
            tasks.spawn_periodic("variety_change", config.timings.variety_change_interval(), move || {
                let seller = Arc::clone(&rotator);
                async move { seller.rotate(RotationTrigger::Periodic).await }
            });
        }
        tasks
    }

    /// Books a sale, rotating varieties every Nth recorded sale.
    pub async fn record_sale(&self, sale: SaleRecord) {
        let config = &self.ctx.config;
        let mut beliefs = self.store.lock().await;
        let removed = beliefs.update_catalog(keys::CATALOG, |catalog| {
            book_sale(catalog, &sale, &self.ctx.varieties)
        });
        beliefs.update_sales(keys::PENDING_SALES, |pending| pending.push(sale.clone()));
        let booked = beliefs.update_sales(keys::SALES_HISTORY, |history| {
            history.push(sale);
            history.len()
        });
        debug!(seller = %self.id, units = removed, booked, "sale booked");

        if config.variety_change_enabled && booked % config.sale_rotation_every == 0 {
            let mut rng = self.rng.lock();
            beliefs.update_catalog(keys::CATALOG, |catalog| {
                self.rotator
                    .rotate_and_record(&self.id, catalog, &mut *rng, RotationTrigger::SaleCount, &self.ctx.log)
            });
        }
    }

    /// Sends every pending sale to the adaptive sellers.
    pub async fn forward_pending(&self) -> usize {
        let pending = {
            let mut beliefs = self.store.lock().await;
            beliefs.update_sales(keys::PENDING_SALES, std::mem::take)
        };
        for sale in &pending {
            let message = MarketMessage::forwarded_sale(self.id.clone(), sale.clone());
            let delivered = self.transport.broadcast(&self.adaptive_peers, &message).await;
            if delivered.len() < self.adaptive_peers.len() {
                warn!(
                    seller = %self.id,
                    delivered = delivered.len(),
                    peers = self.adaptive_peers.len(),
                    "forwarded sale partly undelivered"
                );
            }
        }
        pending.len()
    }

    /// Rotates the catalog's varieties and logs why.
    pub async fn rotate(&self, trigger: RotationTrigger) {
        let mut beliefs = self.store.lock().await;
        let mut rng = self.rng.lock();
        beliefs.update_catalog(keys::CATALOG, |catalog| {
            self.rotator
                .rotate_and_record(&self.id, catalog, &mut *rng, trigger, &self.ctx.log)
        });
    }

    /// Forgets the clients seen so far.
    pub async fn promote(&self) {
        let forgotten = self
            .store
            .lock()
            .await
            .update_agents(keys::CLIENTS, |clients| std::mem::take(clients).len());
        info!(seller = %self.id, forgotten, "running a promotion");
    }
}

impl Deliberator for StandardSeller {
    type Plan = SellerPlan;

    fn id(&self) -> &AgentId {
        &self.id
    }

    async fn revise(&self) {}

    async fn deliberate(&self) -> Option<Intention<SellerPlan>> {
        let situation = {
            let beliefs = self.store.lock().await;
            SellerSituation {
                low_stock: beliefs
                    .catalog(keys::CATALOG)
                    .is_some_and(|c| has_low_stock(c, self.ctx.config.low_stock_floor)),
                known_clients: beliefs.agents(keys::CLIENTS).map_or(0, std::collections::BTreeSet::len),
                min_clients: self.ctx.config.min_known_clients,
            }
        };
        Some(self.desires.deliberate(&situation))
    }

    async fn execute(self: Arc<Self>, plan: SellerPlan) {
        match plan {
            SellerPlan::RotateVarieties => self.rotate(RotationTrigger::LowStock).await,
            SellerPlan::Promote => self.promote().await,
            SellerPlan::Idle => {}
        }
    }
}

impl MessageHandler for StandardSeller {
    async fn handle(&self, from: AgentId, message: MarketMessage) {
        match message {
            MarketMessage::OfferRequest { .. } => {
                answer_request(&self.store, self.transport.as_ref(), from).await;
            }
            MarketMessage::Sale(sale) => self.record_sale(sale).await,
            other => {
                debug!(seller = %self.id, from = %from, tipo = other.kind(), "ignoring message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use agora_core::ActionKind;
    use agora_net::InProcessNetwork;
    use chrono::Utc;
    use rand::SeedableRng;

    fn profile(varieties: &VarietyTable) -> SellerProfile {
        let mut catalog = Catalog::new();
        catalog.insert("Pan", varieties.entry_for("Pan_3", 150).unwrap());
        catalog.insert("Leche", varieties.entry_for("Leche_1", 150).unwrap());
        SellerProfile {
            location: Location::new(10.0, 10.0),
            catalog,
        }
    }

    fn sale(client: &str, variant: &str, qty: u32) -> SaleRecord {
        SaleRecord {
            client_id: AgentId::from(client),
            action: ActionKind::GeneralPurchase,
            purchased: BTreeMap::from([(variant.to_string(), qty)]),
            timestamp: Utc::now(),
        }
    }

    fn seller(ctx: &MarketContext, network: &Arc<InProcessNetwork>, peers: Vec<AgentId>) -> StandardSeller {
        let transport: Arc<dyn Transport> = Arc::new(network.register(AgentId::from("seller-1")));
        StandardSeller::new(&profile(&ctx.varieties), ctx.clone(), transport, peers, StdRng::seed_from_u64(4))
    }

    #[test]
    fn desires_prefer_restocking_over_promotion() {
        let desires = seller_desires();
        let both = SellerSituation {
            low_stock: true,
            known_clients: 0,
            min_clients: 5,
        };
        assert_eq!(desires.deliberate(&both).plan, SellerPlan::RotateVarieties);
        let lonely = SellerSituation { low_stock: false, ..both };
        assert_eq!(desires.deliberate(&lonely).desire, "attract_customers");
        let busy = SellerSituation {
            known_clients: 5,
            ..lonely
        };
        assert_eq!(desires.deliberate(&busy).plan, SellerPlan::Idle);
    }

    #[test]
    fn book_sale_resolves_variants_and_ignores_unknown() {
        let varieties = VarietyTable::standard();
        let mut catalog = profile(&varieties).catalog;
        let mut record = sale("b", "Pan_3", 4);
        record.purchased.insert("Caviar_1".into(), 9);
        assert_eq!(book_sale(&mut catalog, &record, &varieties), 4);
        assert_eq!(catalog.get("Pan").unwrap().stock, 146);
    }

    #[tokio::test]
    async fn request_is_answered_with_catalog() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let buyer = network.register(AgentId::from("buyer-1"));
        let seller = seller(&ctx, &network, Vec::new());

        seller.handle(AgentId::from("buyer-1"), MarketMessage::request()).await;

        let envelope = buyer.recv_timeout(Duration::from_millis(50)).await.unwrap();
        match envelope.open().unwrap() {
            MarketMessage::OfferRequest { products, location } => {
                assert_eq!(products.unwrap().get("Pan").unwrap().stock, 150);
                assert_eq!(location, Some(Location::new(10.0, 10.0)));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        let beliefs = seller.beliefs().snapshot().await;
        assert!(beliefs.agents(keys::CLIENTS).unwrap().contains(&AgentId::from("buyer-1")));
    }

    #[tokio::test]
    async fn every_nth_sale_rotates() {
        let mut config = MarketConfig::default();
        config.sale_rotation_every = 2;
        let ctx = MarketContext::new(config);
        let network = InProcessNetwork::new();
        let seller = seller(&ctx, &network, Vec::new());

        seller.record_sale(sale("b1", "Pan_3", 1)).await;
        assert!(ctx.log.records_of(ActionKind::VarietyRotation).is_empty());
        seller.record_sale(sale("b2", "Pan_3", 1)).await;

        let rotations = ctx.log.records_of(ActionKind::VarietyRotation);
        assert_eq!(rotations.len(), 1);
        assert_eq!(rotations[0].payload["motivo"], "sale_count");
        let beliefs = seller.beliefs().snapshot().await;
        assert_eq!(beliefs.catalog(keys::CATALOG).unwrap().get("Pan").unwrap().stock, 148);
    }

    #[tokio::test]
    async fn pending_sales_reach_every_adaptive_peer_once() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let peer = network.register(AgentId::from("adaptive-1"));
        let seller = seller(&ctx, &network, vec![AgentId::from("adaptive-1")]);

        seller.record_sale(sale("b1", "Pan_3", 2)).await;
        assert_eq!(seller.forward_pending().await, 1);
        assert_eq!(seller.forward_pending().await, 0);

        let envelope = peer.recv_timeout(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(
            envelope.open(),
            Some(MarketMessage::ForwardedSale { seller_id, .. }) if seller_id == AgentId::from("seller-1")
        ));
        assert!(peer.recv_timeout(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn promotion_forgets_clients() {
        let ctx = MarketContext::default();
        let network = InProcessNetwork::new();
        let _buyer = network.register(AgentId::from("buyer-1"));
        let seller = Arc::new(seller(&ctx, &network, Vec::new()));
        seller.handle(AgentId::from("buyer-1"), MarketMessage::request()).await;

        let intention = seller.deliberate().await.unwrap();
        assert_eq!(intention.plan, SellerPlan::Promote);
        Arc::clone(&seller).execute(intention.plan).await;

        let beliefs = seller.beliefs().snapshot().await;
        assert!(beliefs.agents(keys::CLIENTS).unwrap().is_empty());
    }
}
