//! Catalog gossip between adaptive sellers.
//!
//! Each epoch an adaptive seller broadcasts its own sales and catalog to its
//! peers and then deliberates once, in one of two modes:
//!
//! - attraction: imitate the best-selling peer, rotate when nothing sold,
//!   otherwise remember the best catalog so far;
//! - reevaluation: per product, move to the variant that sold best among
//!   nearby standard sellers.
//!
//! Deliberation mutates only the caller's beliefs and returns a
//! [`GossipOutcome`]; [`CatalogGossip::record`] turns that outcome into
//! decision records once the belief lock is released.

use std::collections::BTreeMap;

use agora_core::{
    ActionKind, AgentId, Catalog, DecisionLog, GossipMode, Location, LocationRegistry,
    MarketConfig, ProductName, SaleRecord, VariantId, VarietyTable,
};
use agora_net::MarketMessage;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use tracing::{debug, info};

use crate::beliefs::{BeliefValue, Beliefs, ForwardedSale, PeerMetric, keys};
use crate::rotation::{VariantChange, VarietyRotator};

/// Units sold nearby, per product and variant.
pub type NearbySales = BTreeMap<ProductName, BTreeMap<VariantId, u64>>;

/// Result of one epoch's deliberation.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipOutcome {
    /// Cloned a peer's catalog.
    Adopted {
        /// Peer imitated.
        from: AgentId,
        /// Own sales this epoch.
        own_sales: usize,
        /// The peer's reported sales.
        peer_sales: usize,
    },
    /// Sold nothing and rotated the assortment.
    Rotated {
        /// Variants switched.
        changes: Vec<VariantChange>,
    },
    /// Beat the previous best epoch.
    HistoryUpdated {
        /// Own sales this epoch.
        own_sales: usize,
    },
    /// Nothing to do.
    Kept {
        /// Own sales this epoch.
        own_sales: usize,
    },
    /// Reevaluated products against nearby sales.
    Reevaluated {
        /// Aggregate of nearby sales used.
        nearby: NearbySales,
        /// Sales received this epoch.
        evaluated: Vec<ForwardedSale>,
        /// Variants switched.
        changes: Vec<VariantChange>,
        /// Catalog after the switches.
        catalog: Catalog,
    },
}

impl GossipOutcome {
    /// Short name for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Adopted { .. } => "adopt",
            Self::Rotated { .. } => "rotate",
            Self::HistoryUpdated { .. } => "update_history",
            Self::Kept { .. } => "keep",
            Self::Reevaluated { .. } => "reevaluate",
        }
    }
}

/// Deliberation rules of adaptive sellers.
#[derive(Debug, Clone)]
pub struct CatalogGossip {
    mode: GossipMode,
    proximity_radius: f64,
    rotator: VarietyRotator,
}

impl CatalogGossip {
    /// Creates the protocol for a mode.
    #[must_use]
    pub const fn new(mode: GossipMode, proximity_radius: f64, rotator: VarietyRotator) -> Self {
        Self {
            mode,
            proximity_radius,
            rotator,
        }
    }

    /// Builds the protocol from configuration.
    #[must_use]
    pub fn from_config(config: &MarketConfig, rotator: VarietyRotator) -> Self {
        Self::new(config.gossip_mode, config.proximity_radius, rotator)
    }

    /// Configured mode.
    #[must_use]
    pub const fn mode(&self) -> GossipMode {
        self.mode
    }

    /// The epoch metrics to broadcast.
    #[must_use]
    pub fn metrics_message(beliefs: &Beliefs) -> MarketMessage {
        MarketMessage::metrics(
            beliefs.sales(keys::RECENT_SALES).cloned().unwrap_or_default(),
            beliefs.catalog(keys::CATALOG).cloned().unwrap_or_default(),
        )
    }

    /// Overwrites a peer's last-known metrics.
    pub fn absorb_metrics(
        beliefs: &mut Beliefs,
        peer: AgentId,
        recent_sales: Vec<SaleRecord>,
        catalog: Catalog,
        now: DateTime<Utc>,
    ) {
        beliefs.update_peer_metrics(keys::PEER_METRICS, |metrics| {
            metrics.insert(
                peer,
                PeerMetric {
                    recent_sales,
                    catalog,
                    received_at: now,
                },
            );
        });
    }

    /// Runs one epoch in the configured mode and resets the epoch.
    pub fn deliberate<R: Rng + ?Sized>(
        &self,
        me: &AgentId,
        beliefs: &mut Beliefs,
        rng: &mut R,
        locations: &LocationRegistry,
        varieties: &VarietyTable,
    ) -> GossipOutcome {
        let outcome = match self.mode {
            GossipMode::Attraction => self.attract(me, beliefs, rng),
            GossipMode::Reevaluation => {
                let location = beliefs.location(keys::LOCATION).unwrap_or_default();
                self.reevaluate(beliefs, location, locations, varieties)
            }
        };
        let own_sales = beliefs.sales(keys::RECENT_SALES).map_or(0, Vec::len);
        beliefs.set(keys::PREVIOUS_SALES, BeliefValue::Count(own_sales as u64));
        beliefs.set(keys::RECENT_SALES, BeliefValue::Sales(Vec::new()));
        beliefs.set(keys::EPOCH_RECEIVED_SALES, BeliefValue::ForwardedSales(Vec::new()));
        outcome
    }

    /// Attraction mode: adopt, rotate, or update history.
    ///
    /// The best seller is searched with self first and peers in id order;
    /// only a strictly greater count replaces the current best.
    pub fn attract<R: Rng + ?Sized>(&self, me: &AgentId, beliefs: &mut Beliefs, rng: &mut R) -> GossipOutcome {
        let own_sales = beliefs.sales(keys::RECENT_SALES).map_or(0, Vec::len);

        let mut best: (Option<&AgentId>, usize) = (None, own_sales);
        let metrics = beliefs.peer_metrics(keys::PEER_METRICS);
        for (peer, metric) in metrics.into_iter().flatten() {
            if peer != me && metric.sale_count() > best.1 {
                best = (Some(peer), metric.sale_count());
            }
        }
        let adopted = match best {
            (Some(peer), peer_sales) => metrics
                .and_then(|m| m.get(peer))
                .map(|metric| (peer.clone(), peer_sales, metric.catalog.clone())),
            (None, _) => None,
        };

        if let Some((from, peer_sales, catalog)) = adopted {
            info!(seller = %me, from = %from, own_sales, peer_sales, "adopting peer catalog");
            beliefs.set(keys::SUCCESSFUL_CATALOG, BeliefValue::Catalog(catalog.clone()));
            beliefs.set(keys::CATALOG, BeliefValue::Catalog(catalog));
            return GossipOutcome::Adopted {
                from,
                own_sales,
                peer_sales,
            };
        }

        if own_sales == 0 {
            let changes = beliefs.update_catalog(keys::CATALOG, |catalog| self.rotator.rotate(catalog, rng));
            info!(seller = %me, changed = changes.len(), "no sales, rotating assortment");
            return GossipOutcome::Rotated { changes };
        }

        if own_sales as u64 > beliefs.count(keys::MAX_SALES) {
            let catalog = beliefs.catalog(keys::CATALOG).cloned().unwrap_or_default();
            beliefs.set(keys::MAX_SALES, BeliefValue::Count(own_sales as u64));
            beliefs.set(keys::SUCCESSFUL_CATALOG, BeliefValue::Catalog(catalog));
            debug!(seller = %me, own_sales, "new best epoch");
            return GossipOutcome::HistoryUpdated { own_sales };
        }

        GossipOutcome::Kept { own_sales }
    }

    /// Reevaluation mode: follow what sells nearby.
    pub fn reevaluate(
        &self,
        beliefs: &mut Beliefs,
        me: Location,
        locations: &LocationRegistry,
        varieties: &VarietyTable,
    ) -> GossipOutcome {
        let evaluated = beliefs
            .forwarded_sales(keys::EPOCH_RECEIVED_SALES)
            .cloned()
            .unwrap_or_default();
        let nearby = nearby_sales(&evaluated, me, self.proximity_radius, locations, varieties);

        let changes = beliefs.update_catalog(keys::CATALOG, |catalog| {
            let picks: Vec<(ProductName, VariantId)> = catalog
                .iter()
                .filter_map(|(product, entry)| {
                    let counts = nearby.get(product)?;
                    let best = best_variant(&entry.variant, counts);
                    (best != entry.variant).then(|| (product.clone(), best))
                })
                .collect();
            picks
                .into_iter()
                .filter_map(|(product, variant)| self.rotator.switch_variant(catalog, &product, &variant))
                .collect::<Vec<_>>()
        });

        GossipOutcome::Reevaluated {
            nearby,
            evaluated,
            changes,
            catalog: beliefs.catalog(keys::CATALOG).cloned().unwrap_or_default(),
        }
    }

    /// Appends the decision records an outcome calls for.
    pub fn record(&self, me: &AgentId, outcome: &GossipOutcome, log: &DecisionLog) {
        match outcome {
            GossipOutcome::Adopted {
                from,
                own_sales,
                peer_sales,
            } => {
                log.append(
                    me,
                    ActionKind::AdoptCatalog,
                    json!({ "ventas_propias": own_sales, "origen": from, "ventas_origen": peer_sales }),
                );
            }
            GossipOutcome::Rotated { changes } => {
                log.append(
                    me,
                    ActionKind::RotateAssortment,
                    json!({ "ventas_propias": 0, "cambios": changes }),
                );
            }
            GossipOutcome::HistoryUpdated { own_sales } => {
                log.append(me, ActionKind::UpdateHistory, json!({ "ventas_propias": own_sales }));
            }
            GossipOutcome::Kept { .. } => {}
            GossipOutcome::Reevaluated {
                nearby,
                evaluated,
                changes,
                catalog,
            } => {
                if changes.is_empty() {
                    return;
                }
                for change in changes {
                    log.append(
                        me,
                        ActionKind::VariantChange,
                        json!({ "producto": change.product, "anterior": change.from, "nueva": change.to }),
                    );
                }
                log.append(me, ActionKind::CatalogSnapshot, json!({ "productos": catalog }));
                log.append(
                    me,
                    ActionKind::ChangeEvaluation,
                    json!({ "nearby_sales": nearby, "ventas_evaluadas": evaluated, "cambios": changes }),
                );
            }
        }
    }
}

/// Aggregates forwarded sales from sellers within `radius` of `me`.
///
/// Sales from sellers with no known location are ignored.
#[must_use]
pub fn nearby_sales(
    sales: &[ForwardedSale],
    me: Location,
    radius: f64,
    locations: &LocationRegistry,
    varieties: &VarietyTable,
) -> NearbySales {
    let mut nearby = NearbySales::new();
    for forwarded in sales {
        let Some(at) = locations.seller(&forwarded.seller_id) else {
            continue;
        };
        if me.distance_to(&at) > radius {
            continue;
        }
        for (variant, qty) in &forwarded.sale.purchased {
            let product = varieties
                .product_of(variant)
                .cloned()
                .unwrap_or_else(|| variant.split('_').next().unwrap_or(variant).to_owned());
            *nearby
                .entry(product)
                .or_default()
                .entry(variant.clone())
                .or_insert(0) += u64::from(*qty);
        }
    }
    nearby
}

/// The variant with the strictly highest count, `current` on ties.
fn best_variant(current: &str, counts: &BTreeMap<VariantId, u64>) -> VariantId {
    let mut best = (current, counts.get(current).copied().unwrap_or(0));
    for (variant, qty) in counts {
        if *qty > best.1 {
            best = (variant, *qty);
        }
    }
    best.0.to_owned()
}
