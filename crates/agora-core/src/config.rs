//! Simulation configuration.
//!
//! Every field has a default matching the reference market, so a config
//! file only needs the values it overrides.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How adaptive sellers react to gossip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GossipMode {
    /// Imitate the best-selling peer.
    #[default]
    #[serde(alias = "atraccion_clientes")]
    Attraction,
    /// Follow what sells nearby, product by product.
    #[serde(alias = "reevaluacion_productos")]
    Reevaluation,
}

/// Relative weight of ethics against distance when picking a seller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Weight of the ethical match.
    pub ethical: f64,
    /// Weight of the travel distance.
    pub distance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            ethical: 1.0,
            distance: 0.0,
        }
    }
}

impl ScoringWeights {
    /// Creates weights.
    #[must_use]
    pub const fn new(ethical: f64, distance: f64) -> Self {
        Self { ethical, distance }
    }

    /// Returns `(ethical, distance)` normalized to sum 1, or `None` when both are zero.
    #[must_use]
    pub fn normalized(&self) -> Option<(f64, f64)> {
        let total = self.ethical + self.distance;
        if total > 0.0 {
            Some((self.ethical / total, self.distance / total))
        } else {
            None
        }
    }
}

/// Inclusive integer range a random quantity is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityRange {
    /// Lower bound (inclusive).
    pub min: u32,
    /// Upper bound (inclusive).
    pub max: u32,
}

impl QuantityRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// As a std range.
    #[must_use]
    pub const fn as_range(&self) -> RangeInclusive<u32> {
        self.min..=self.max
    }

    /// Returns true if `value` is inside the range.
    #[must_use]
    pub const fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Task periods and timeouts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Buyer deliberation period.
    pub buyer_cycle_ms: u64,
    /// Standard seller deliberation period.
    pub seller_cycle_ms: u64,
    /// Adaptive seller deliberation (epoch) period.
    pub adaptive_cycle_ms: u64,
    /// Periodic variety rotation period.
    pub variety_change_interval_ms: u64,
    /// Adaptive seller metric broadcast period.
    pub metrics_broadcast_ms: u64,
    /// Bounded wait of every receive loop.
    pub receive_timeout_ms: u64,
    /// Pause before a standard seller forwards pending sales.
    pub sales_forward_delay_ms: u64,
    /// Age at which a cached offer is evicted.
    pub offer_ttl_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            buyer_cycle_ms: 5_000,
            seller_cycle_ms: 10_000,
            adaptive_cycle_ms: 10_000,
            variety_change_interval_ms: 20_000,
            metrics_broadcast_ms: 15_000,
            receive_timeout_ms: 10_000,
            sales_forward_delay_ms: 1_000,
            offer_ttl_ms: 30_000,
        }
    }
}

impl Timings {
    /// Buyer deliberation period.
    #[must_use]
    pub const fn buyer_cycle(&self) -> Duration {
        Duration::from_millis(self.buyer_cycle_ms)
    }

    /// Standard seller deliberation period.
    #[must_use]
    pub const fn seller_cycle(&self) -> Duration {
        Duration::from_millis(self.seller_cycle_ms)
    }

    /// Adaptive seller deliberation period.
    #[must_use]
    pub const fn adaptive_cycle(&self) -> Duration {
        Duration::from_millis(self.adaptive_cycle_ms)
    }

    /// Periodic rotation period.
    #[must_use]
    pub const fn variety_change_interval(&self) -> Duration {
        Duration::from_millis(self.variety_change_interval_ms)
    }

    /// Metric broadcast period.
    #[must_use]
    pub const fn metrics_broadcast(&self) -> Duration {
        Duration::from_millis(self.metrics_broadcast_ms)
    }

    /// Receive timeout.
    #[must_use]
    pub const fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Sales forward delay.
    #[must_use]
    pub const fn sales_forward_delay(&self) -> Duration {
        Duration::from_millis(self.sales_forward_delay_ms)
    }

    /// Offer staleness window.
    #[must_use]
    pub fn offer_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.offer_ttl_ms).unwrap_or(i64::MAX))
    }

    fn all_mut(&mut self) -> [&mut u64; 8] {
        [
            &mut self.buyer_cycle_ms,
            &mut self.seller_cycle_ms,
            &mut self.adaptive_cycle_ms,
            &mut self.variety_change_interval_ms,
            &mut self.metrics_broadcast_ms,
            &mut self.receive_timeout_ms,
            &mut self.sales_forward_delay_ms,
            &mut self.offer_ttl_ms,
        ]
    }
}

/// Full configuration of a market simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Number of standard sellers.
    pub num_sellers: usize,
    /// Number of adaptive sellers.
    pub num_adaptive_sellers: usize,
    /// Number of buyers.
    pub num_buyers: usize,
    /// Purchases a buyer may make before finishing.
    pub max_purchases: u32,
    /// A buyer holding fewer units of an indispensable product is short of it.
    pub indispensable_threshold: u32,
    /// How many indispensable products each buyer draws.
    pub indispensable_count: usize,
    /// Total inventory below which a buyer shops generally.
    pub basic_inventory_min: u32,
    /// Seller scoring weights.
    pub weights: ScoringWeights,
    /// Whether buyers take distance into account.
    pub location_aware: bool,
    /// Quantity drawn per shortage product.
    pub priority_quantity: QuantityRange,
    /// Quantity drawn per catalog product in a general purchase.
    pub general_quantity: QuantityRange,
    /// Initial stock per product line.
    pub initial_stock: QuantityRange,
    /// Side of the square grid agents are placed on.
    pub grid_size: u32,
    /// Stock below which a seller rotates varieties.
    pub low_stock_floor: u32,
    /// Standard sellers rotate after every this many recorded sales.
    pub sale_rotation_every: usize,
    /// Enables periodic and sale-count rotation.
    pub variety_change_enabled: bool,
    /// Standard sellers with fewer known clients run a promotion.
    pub min_known_clients: usize,
    /// Radius within which a peer counts as nearby.
    pub proximity_radius: f64,
    /// Adaptive seller strategy.
    pub gossip_mode: GossipMode,
    /// Task periods and timeouts.
    pub timings: Timings,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            num_sellers: 15,
            num_adaptive_sellers: 2,
            num_buyers: 50,
            max_purchases: 750,
            indispensable_threshold: 2,
            indispensable_count: 3,
            basic_inventory_min: 8,
            weights: ScoringWeights::default(),
            location_aware: true,
            priority_quantity: QuantityRange::new(2, 6),
            general_quantity: QuantityRange::new(0, 5),
            initial_stock: QuantityRange::new(300, 500),
            grid_size: 100,
            low_stock_floor: 100,
            sale_rotation_every: 30,
            variety_change_enabled: true,
            min_known_clients: 5,
            proximity_radius: 200.0,
            gossip_mode: GossipMode::Attraction,
            timings: Timings::default(),
            seed: None,
        }
    }
}

impl MarketConfig {
    /// Parses a config from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the config is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or is invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Multiplies every period and timeout by `factor` (never below 1 ms).
    #[must_use]
    pub fn with_time_scale(mut self, factor: f64) -> Self {
        for value in self.timings.all_mut() {
            let scaled = (*value as f64 * factor).round();
            *value = if scaled < 1.0 { 1 } else { scaled as u64 };
        }
        self
    }

    /// Sets the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the gossip mode.
    #[must_use]
    pub const fn with_gossip_mode(mut self, mode: GossipMode) -> Self {
        self.gossip_mode = mode;
        self
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, range) in [
            ("priority_quantity", self.priority_quantity),
            ("general_quantity", self.general_quantity),
            ("initial_stock", self.initial_stock),
        ] {
            if range.min > range.max {
                return Err(CoreError::InvalidConfig(format!(
                    "{name}: min {} exceeds max {}",
                    range.min, range.max
                )));
            }
        }
        if self.weights.ethical < 0.0 || self.weights.distance < 0.0 {
            return Err(CoreError::InvalidConfig("weights must be non-negative".into()));
        }
        if self.proximity_radius < 0.0 {
            return Err(CoreError::InvalidConfig("proximity_radius must be non-negative".into()));
        }
        if self.sale_rotation_every == 0 {
            return Err(CoreError::InvalidConfig("sale_rotation_every must be positive".into()));
        }
        let mut timings = self.timings.clone();
        if timings.all_mut().into_iter().any(|v| *v == 0) {
            return Err(CoreError::InvalidConfig("every timing must be positive".into()));
        }
        Ok(())
    }
}
