//! Seller ranking for buyers.

use std::collections::BTreeMap;

use agora_core::{AgentId, Catalog, EthicsVector, Location, Offer, ScoringWeights};

/// How well a catalog matches a buyer's ethics.
///
/// Sums `client[c] * product[c]` over every in-stock product and every
/// criterion the product carries; criteria the buyer lacks count as 0.
#[must_use]
pub fn ethical_score(client: &EthicsVector, catalog: &Catalog) -> f64 {
    catalog
        .iter()
        .filter(|(_, entry)| entry.in_stock())
        .flat_map(|(_, entry)| entry.ethics.iter())
        .map(|(criterion, value)| client.get(criterion).copied().unwrap_or(0.0) * value)
        .sum()
}

/// A seller and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSeller {
    /// The seller.
    pub seller: AgentId,
    /// Its score.
    pub score: f64,
}

/// Ranks cached offers with weighted ethics and distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketScorer {
    weights: ScoringWeights,
    location_aware: bool,
}

impl MarketScorer {
    /// Creates a scorer.
    #[must_use]
    pub const fn new(weights: ScoringWeights, location_aware: bool) -> Self {
        Self {
            weights,
            location_aware,
        }
    }

    /// Score of one offer for a buyer at `buyer_location`.
    #[must_use]
    pub fn score(&self, ethics: &EthicsVector, buyer_location: Location, offer: &Offer) -> f64 {
        let Some((w_ethical, w_distance)) = self.weights.normalized() else {
            return 0.0;
        };
        let distance = if self.location_aware {
            buyer_location.distance_to(&offer.location)
        } else {
            0.0
        };
        w_ethical * ethical_score(ethics, &offer.products) - w_distance * distance
    }

    /// The seller with the strictly greatest score.
    ///
    /// Offers are visited in ascending seller order, so the lowest id wins a
    /// tie. Returns `None` when there are no offers.
    #[must_use]
    pub fn select(
        &self,
        ethics: &EthicsVector,
        buyer_location: Location,
        offers: &BTreeMap<AgentId, Offer>,
    ) -> Option<ScoredSeller> {
        let mut best: Option<ScoredSeller> = None;
        for (seller, offer) in offers {
            let score = self.score(ethics, buyer_location, offer);
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(ScoredSeller {
                    seller: seller.clone(),
                    score,
                });
            }
        }
        best
    }
}
