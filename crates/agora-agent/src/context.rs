//! State shared by every agent of one simulation.

use std::sync::Arc;

use agora_core::{CompletionSet, DecisionLog, LocationRegistry, MarketConfig, VarietyTable};

/// Handles injected into every agent at construction.
///
/// The ledgers each guard themselves; no agent holds one of their locks
/// while awaiting.
#[derive(Debug, Clone)]
pub struct MarketContext {
    /// Simulation configuration.
    pub config: Arc<MarketConfig>,
    /// Product variants and their ethics.
    pub varieties: Arc<VarietyTable>,
    /// Append-only decision log.
    pub log: Arc<DecisionLog>,
    /// Buyers that finished.
    pub completions: Arc<CompletionSet>,
    /// Agent locations.
    pub locations: Arc<LocationRegistry>,
}

impl MarketContext {
    /// Fresh ledgers over the standard variety table.
    #[must_use]
    pub fn new(config: MarketConfig) -> Self {
        Self::with_varieties(config, VarietyTable::standard())
    }

    /// Fresh ledgers over a custom variety table.
    #[must_use]
    pub fn with_varieties(config: MarketConfig, varieties: VarietyTable) -> Self {
        Self {
            config: Arc::new(config),
            varieties: Arc::new(varieties),
            log: Arc::new(DecisionLog::new()),
            completions: Arc::new(CompletionSet::new()),
            locations: Arc::new(LocationRegistry::new()),
        }
    }
}

impl Default for MarketContext {
    fn default() -> Self {
        Self::new(MarketConfig::default())
    }
}
