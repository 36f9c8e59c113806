//! Simulation assembly, lifecycle and reporting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_core::{ActionKind, AgentId, MarketConfig};
use agora_net::{InProcessNetwork, NetworkStats, Transport};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use crate::adaptive::AdaptiveSeller;
use crate::beliefs::Beliefs;
use crate::buyer::{Buyer, BuyerProfile};
use crate::context::MarketContext;
use crate::error::AgentError;
use crate::scheduler::TaskSet;
use crate::seller::{SellerProfile, StandardSeller};

const COMPLETION_POLL: Duration = Duration::from_millis(50);

/// Role of an agent in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Buyer.
    Buyer,
    /// Standard seller.
    Seller,
    /// Adaptive seller.
    AdaptiveSeller,
}

/// One agent's beliefs at report time.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    /// Agent identity.
    pub id: AgentId,
    /// Agent role.
    pub role: AgentRole,
    /// Beliefs at report time.
    pub beliefs: Beliefs,
}

/// Summary of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Every buyer finished.
    pub completed: bool,
    /// Wall time since start.
    pub elapsed_ms: u64,
    /// Buyers in the market.
    pub buyers: usize,
    /// Buyers that finished.
    pub finished_buyers: usize,
    /// Decision records appended.
    pub decisions: usize,
    /// Decision records per action.
    pub actions: BTreeMap<ActionKind, usize>,
    /// Purchases per chosen seller.
    pub purchases_per_seller: BTreeMap<AgentId, usize>,
    /// Network delivery counters.
    pub network: NetworkStats,
    /// Per-agent belief snapshots.
    pub agents: Vec<AgentSnapshot>,
}

impl SimulationReport {
    /// Total purchases across all sellers.
    #[must_use]
    pub fn total_purchases(&self) -> usize {
        self.purchases_per_seller.values().sum()
    }
}

/// A fully wired market.
#[derive(Debug)]
pub struct Simulation {
    ctx: MarketContext,
    network: Arc<InProcessNetwork>,
    buyers: Vec<Arc<Buyer>>,
    sellers: Vec<Arc<StandardSeller>>,
    adaptive: Vec<Arc<AdaptiveSeller>>,
    tasks: Vec<TaskSet>,
    started_at: Option<Instant>,
    stopped: bool,
}

impl Simulation {
    /// Builds every agent on a fresh network.
    ///
    /// Adaptive sellers peer with each other, standard sellers forward to
    /// every adaptive seller, and buyers query every seller.
    pub fn build(config: MarketConfig) -> Result<Self, AgentError> {
        Self::build_with(MarketContext::new(config), InProcessNetwork::new())
    }

    /// Builds every agent over existing ledgers and network.
    pub fn build_with(ctx: MarketContext, network: Arc<InProcessNetwork>) -> Result<Self, AgentError> {
        let config = Arc::clone(&ctx.config);
        config.validate()?;
        if config.num_buyers > 0 && config.num_sellers + config.num_adaptive_sellers == 0 {
            return Err(AgentError::InvalidSetup("buyers need at least one seller".into()));
        }
        let mut master = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        let seller_ids: Vec<AgentId> = (0..config.num_sellers)
            .map(|i| AgentId::new(format!("seller-{i:03}")))
            .collect();
        let adaptive_ids: Vec<AgentId> = (0..config.num_adaptive_sellers)
            .map(|i| AgentId::new(format!("adaptive-{i:03}")))
            .collect();
        let all_sellers: Vec<AgentId> = seller_ids.iter().chain(&adaptive_ids).cloned().collect();

        let sellers = seller_ids
            .iter()
            .map(|id| {
                let profile = SellerProfile::random(&mut master, &config, &ctx.varieties);
                let rng = StdRng::seed_from_u64(master.next_u64());
                Arc::new(StandardSeller::new(
                    &profile,
                    ctx.clone(),
                    endpoint(&network, id),
                    adaptive_ids.clone(),
                    rng,
                ))
            })
            .collect();

        let adaptive = adaptive_ids
            .iter()
            .map(|id| {
                let profile = SellerProfile::random(&mut master, &config, &ctx.varieties);
                let rng = StdRng::seed_from_u64(master.next_u64());
                let peers = adaptive_ids.iter().filter(|p| *p != id).cloned().collect();
                Arc::new(AdaptiveSeller::new(&profile, ctx.clone(), endpoint(&network, id), peers, rng))
            })
            .collect();

        let buyers = (0..config.num_buyers)
            .map(|i| {
                let id = AgentId::new(format!("buyer-{i:03}"));
                let profile = BuyerProfile::random(&mut master, &config, &ctx.varieties);
                let rng = StdRng::seed_from_u64(master.next_u64());
                Arc::new(Buyer::new(&profile, ctx.clone(), endpoint(&network, &id), all_sellers.clone(), rng))
            })
            .collect();

        info!(
            buyers = config.num_buyers,
            sellers = config.num_sellers,
            adaptive = config.num_adaptive_sellers,
            mode = ?config.gossip_mode,
            "simulation built"
        );
        Ok(Self {
            ctx,
            network,
            buyers,
            sellers,
            adaptive,
            tasks: Vec::new(),
            started_at: None,
            stopped: false,
        })
    }

    /// Shared ledgers and configuration.
    #[must_use]
    pub const fn context(&self) -> &MarketContext {
        &self.ctx
    }

    /// The network all agents are registered on.
    #[must_use]
    pub const fn network(&self) -> &Arc<InProcessNetwork> {
        &self.network
    }

    /// Buyers in id order.
    #[must_use]
    pub fn buyers(&self) -> &[Arc<Buyer>] {
        &self.buyers
    }

    /// Standard sellers in id order.
    #[must_use]
    pub fn sellers(&self) -> &[Arc<StandardSeller>] {
        &self.sellers
    }

    /// Adaptive sellers in id order.
    #[must_use]
    pub fn adaptive_sellers(&self) -> &[Arc<AdaptiveSeller>] {
        &self.adaptive
    }

    /// Returns true between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.stopped
    }

    /// Spawns every agent's tasks. Must be called from a tokio runtime.
    pub fn start(&mut self) -> Result<(), AgentError> {
        if self.stopped {
            return Err(AgentError::WrongState("stopped"));
        }
        if self.started_at.is_some() {
            return Err(AgentError::WrongState("already running"));
        }
        self.tasks.extend(self.sellers.iter().map(StandardSeller::spawn));
        self.tasks.extend(self.adaptive.iter().map(AdaptiveSeller::spawn));
        self.tasks.extend(self.buyers.iter().map(Buyer::spawn));
        self.started_at = Some(Instant::now());
        info!(tasks = self.tasks.iter().map(TaskSet::len).sum::<usize>(), "simulation started");
        Ok(())
    }

    /// Waits until every buyer finished or `timeout` elapses.
    ///
    /// Returns true if every buyer finished.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let expected = self.buyers.len();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let finished = self.ctx.completions.len();
            if finished >= expected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(finished, expected, "timed out waiting for buyers");
                return false;
            }
            tokio::time::sleep(COMPLETION_POLL).await;
        }
    }

    /// Cancels every task and waits for them to end. Repeat calls do nothing.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        for tasks in &mut self.tasks {
            tasks.shutdown().await;
        }
        info!(decisions = self.ctx.log.len(), "simulation stopped");
    }

    /// Starts, waits up to `timeout`, stops, and reports.
    pub async fn run(&mut self, timeout: Duration) -> Result<SimulationReport, AgentError> {
        self.start()?;
        self.wait_for_completion(timeout).await;
        self.stop().await;
        Ok(self.report().await)
    }

    /// Summarises the decision log and snapshots every agent.
    pub async fn report(&self) -> SimulationReport {
        let records = self.ctx.log.records();
        let mut purchases_per_seller = BTreeMap::new();
        for record in records.iter().filter(|r| r.action.is_purchase()) {
            if let Some(seller) = record.payload["supermercado_elegido"].as_str() {
                *purchases_per_seller.entry(AgentId::from(seller)).or_insert(0) += 1;
            }
        }

        let mut agents = Vec::with_capacity(self.sellers.len() + self.adaptive.len() + self.buyers.len());
        for seller in &self.sellers {
            agents.push(snapshot(seller.id(), AgentRole::Seller, seller.beliefs().snapshot().await));
        }
        for seller in &self.adaptive {
            agents.push(snapshot(seller.id(), AgentRole::AdaptiveSeller, seller.beliefs().snapshot().await));
        }
        for buyer in &self.buyers {
            agents.push(snapshot(buyer.id(), AgentRole::Buyer, buyer.beliefs().snapshot().await));
        }

        let finished_buyers = self.ctx.completions.len();
        SimulationReport {
            completed: finished_buyers >= self.buyers.len(),
            elapsed_ms: self
                .started_at
                .map_or(0, |t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX)),
            buyers: self.buyers.len(),
            finished_buyers,
            decisions: records.len(),
            actions: self.ctx.log.count_by_action(),
            purchases_per_seller,
            network: self.network.stats(),
            agents,
        }
    }
}

fn endpoint(network: &Arc<InProcessNetwork>, id: &AgentId) -> Arc<dyn Transport> {
    Arc::new(network.register(id.clone()))
}

fn snapshot(id: &AgentId, role: AgentRole, beliefs: Beliefs) -> AgentSnapshot {
    AgentSnapshot {
        id: id.clone(),
        role,
        beliefs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::QuantityRange;

    fn small() -> MarketConfig {
        let mut config = MarketConfig::default().with_seed(7);
        config.num_sellers = 3;
        config.num_adaptive_sellers = 2;
        config.num_buyers = 4;
        config
    }

    #[test]
    fn build_wires_peers() {
        let sim = Simulation::build(small()).unwrap();
        assert_eq!(sim.sellers().len(), 3);
        assert_eq!(sim.adaptive_sellers().len(), 2);
        assert_eq!(sim.buyers().len(), 4);
        assert_eq!(sim.context().locations.sellers().len(), 5);
        assert_eq!(sim.context().locations.buyers().len(), 4);
        assert!(sim.network().is_registered(&AgentId::from("buyer-003")));
        assert!(!sim.is_running());
    }

    #[test]
    fn buyers_without_sellers_is_rejected() {
        let mut config = small();
        config.num_sellers = 0;
        config.num_adaptive_sellers = 0;
        assert!(matches!(Simulation::build(config), Err(AgentError::InvalidSetup(_))));
    }

    #[test]
    fn build_with_rejects_invalid_config() {
        let mut config = small();
        config.sale_rotation_every = 0;
        let result = Simulation::build_with(MarketContext::new(config), InProcessNetwork::new());
        assert!(matches!(result, Err(AgentError::Core(_))));

        let mut config = small();
        config.priority_quantity = QuantityRange::new(6, 2);
        let result = Simulation::build_with(MarketContext::new(config), InProcessNetwork::new());
        assert!(matches!(result, Err(AgentError::Core(_))));
    }

    #[test]
    fn same_seed_same_market() {
        let a = Simulation::build(small()).unwrap();
        let b = Simulation::build(small()).unwrap();
        assert_eq!(a.context().locations.sellers(), b.context().locations.sellers());
        assert_eq!(a.context().locations.buyers(), b.context().locations.buyers());
    }

    #[tokio::test]
    async fn lifecycle_guards() {
        let mut config = small();
        config.num_buyers = 0;
        let mut sim = Simulation::build(config).unwrap();
        sim.start().unwrap();
        assert!(matches!(sim.start(), Err(AgentError::WrongState(_))));
        assert!(sim.wait_for_completion(Duration::from_millis(10)).await);
        sim.stop().await;
        sim.stop().await;
        assert!(!sim.is_running());
        assert!(matches!(sim.start(), Err(AgentError::WrongState("stopped"))));

        let report = sim.report().await;
        assert!(report.completed);
        assert_eq!(report.agents.len(), 5);
    }
}
