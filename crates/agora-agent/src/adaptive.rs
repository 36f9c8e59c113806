//! Adaptive sellers.
//!
//! Adaptive sellers trade like standard sellers, but also exchange sales
//! metrics with each other and collect the sales standard sellers forward.
//! Every cycle closes an epoch: the seller runs catalog gossip in the
//! configured mode and starts counting again.

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_core::{AgentId, SaleRecord};
use agora_net::{MarketMessage, Transport};
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::beliefs::{BeliefStore, BeliefValue, ForwardedSale, keys};
use crate::context::MarketContext;
use crate::desire::{DesireSet, Intention, Plan};
use crate::gossip::{CatalogGossip, GossipOutcome};
use crate::rotation::VarietyRotator;
use crate::scheduler::{Deliberator, MessageHandler, TaskSet};
use crate::seller::{SellerProfile, answer_request, book_sale};

/// Plans an adaptive seller can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptivePlan {
    /// Close the epoch with a gossip deliberation.
    GossipDeliberation,
    /// Nothing to do.
    Idle,
}

impl Plan for AdaptivePlan {
    fn label(&self) -> &'static str {
        match self {
            Self::GossipDeliberation => "gossip_deliberation",
            Self::Idle => "idle",
        }
    }
}

fn adaptive_desires() -> DesireSet<(), AdaptivePlan> {
    DesireSet::new("idle", |&()| AdaptivePlan::Idle)
        .with_desire("adapt_to_market", |&()| Some(AdaptivePlan::GossipDeliberation))
}

/// An adaptive seller.
pub struct AdaptiveSeller {
    id: AgentId,
    store: BeliefStore,
    ctx: MarketContext,
    transport: Arc<dyn Transport>,
    peers: Vec<AgentId>,
    rng: Mutex<StdRng>,
    gossip: CatalogGossip,
    desires: DesireSet<(), AdaptivePlan>,
}

impl std::fmt::Debug for AdaptiveSeller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveSeller")
            .field("id", &self.id)
            .field("peers", &self.peers)
            .field("mode", &self.gossip.mode())
            .finish_non_exhaustive()
    }
}

impl AdaptiveSeller {
    /// Creates an adaptive seller and registers its location.
    #[must_use]
    pub fn new(
        profile: &SellerProfile,
        ctx: MarketContext,
        transport: Arc<dyn Transport>,
        peers: Vec<AgentId>,
        rng: StdRng,
    ) -> Self {
        let id = transport.local_id().clone();
        ctx.locations.register_seller(&id, profile.location);
        let beliefs = profile
            .beliefs()
            .with(keys::RECENT_SALES, BeliefValue::Sales(Vec::new()))
            .with(keys::EPOCH_RECEIVED_SALES, BeliefValue::ForwardedSales(Vec::new()))
            .with(keys::RECEIVED_SALES, BeliefValue::ForwardedSales(Vec::new()))
            .with(keys::PEER_METRICS, BeliefValue::PeerMetrics(BTreeMap::new()))
            .with(keys::MAX_SALES, BeliefValue::Count(0))
            .with(keys::PREVIOUS_SALES, BeliefValue::Count(0))
            .with(keys::SUCCESSFUL_CATALOG, BeliefValue::Catalog(profile.catalog.clone()));
        let rotator = VarietyRotator::new(Arc::clone(&ctx.varieties));
        Self {
            store: BeliefStore::new(id.clone(), beliefs),
            gossip: CatalogGossip::from_config(&ctx.config, rotator),
            desires: adaptive_desires(),
            id,
            ctx,
            transport,
            peers,
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

    /// Starts the receive, epoch and metrics broadcast tasks.
    pub fn spawn(self: &Arc<Self>) -> TaskSet {
        let timings = &self.ctx.config.timings;
        let mut tasks = TaskSet::new(self.id.clone());
        tasks.spawn_receiver(Arc::clone(self), Arc::clone(&self.transport), timings.receive_timeout());
        tasks.spawn_deliberation(Arc::clone(self), timings.adaptive_cycle());

        let broadcaster = Arc::clone(self);
        tasks.spawn_periodic("metrics_broadcast", timings.metrics_broadcast(), move || {
            let seller = Arc::clone(&broadcaster);
            async move {
                seller.broadcast_metrics().await;
            }
        });
        tasks
    }

    /// Sends this epoch's sales and catalog to every peer.
    pub async fn broadcast_metrics(&self) -> usize {
        let message = CatalogGossip::metrics_message(&*self.store.lock().await);
        let delivered = self.transport.broadcast(&self.peers, &message).await;
        debug!(seller = %self.id, peers = delivered.len(), "metrics broadcast");
        delivered.len()
    }

    /// Closes the epoch: deliberates under the belief lock, records after.
    ///
    /// Peer metrics older than the offer TTL are dropped first, so a peer
    /// that stopped broadcasting cannot be imitated.
    pub async fn close_epoch(&self) -> GossipOutcome {
        let outcome = {
            let mut beliefs = self.store.lock().await;
            let evicted = beliefs.evict_stale_peer_metrics(Utc::now(), self.ctx.config.timings.offer_ttl());
            if !evicted.is_empty() {
                debug!(seller = %self.id, evicted = evicted.len(), "dropped stale peer metrics");
            }
            let mut rng = self.rng.lock();
            self.gossip.deliberate(
                &self.id,
                &mut beliefs,
                &mut *rng,
                &self.ctx.locations,
                &self.ctx.varieties,
            )
        };
        self.gossip.record(&self.id, &outcome, &self.ctx.log);
        info!(seller = %self.id, outcome = outcome.label(), "epoch closed");
        outcome
    }

    async fn record_sale(&self, sale: SaleRecord) {
        let mut beliefs = self.store.lock().await;
        beliefs.update_catalog(keys::CATALOG, |catalog| book_sale(catalog, &sale, &self.ctx.varieties));
        beliefs.update_sales(keys::RECENT_SALES, |recent| recent.push(sale));
    }

    async fn record_forwarded(&self, seller_id: AgentId, sale: SaleRecord) {
        let forwarded = ForwardedSale { seller_id, sale };
        let mut beliefs = self.store.lock().await;
        beliefs.update_forwarded_sales(keys::EPOCH_RECEIVED_SALES, |epoch| epoch.push(forwarded.clone()));
        beliefs.update_forwarded_sales(keys::RECEIVED_SALES, |all| all.push(forwarded));
    }
}

impl Deliberator for AdaptiveSeller {
    type Plan = AdaptivePlan;

    fn id(&self) -> &AgentId {
        &self.id
    }

    async fn revise(&self) {}

    async fn deliberate(&self) -> Option<Intention<AdaptivePlan>> {
        Some(self.desires.deliberate(&()))
    }

    async fn execute(self: Arc<Self>, plan: AdaptivePlan) {
        if plan == AdaptivePlan::GossipDeliberation {
            self.close_epoch().await;
        }
    }
}

impl MessageHandler for AdaptiveSeller {
    async fn handle(&self, from: AgentId, message: MarketMessage) {
        match message {
            MarketMessage::OfferRequest { .. } => {
                answer_request(&self.store, self.transport.as_ref(), from).await;
            }
            MarketMessage::Sale(sale) => self.record_sale(sale).await,
            MarketMessage::ForwardedSale { seller_id, sale } => self.record_forwarded(seller_id, sale).await,
            MarketMessage::Metrics { recent_sales, catalog } => {
                let mut beliefs = self.store.lock().await;
                CatalogGossip::absorb_metrics(&mut beliefs, from, recent_sales, catalog, Utc::now());
            }
        }
    }
}
