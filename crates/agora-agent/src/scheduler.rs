//! Per-agent task scheduling.
//!
//! Every agent runs a small set of cooperative tasks: a fixed-interval
//! deliberation task, a receive loop with a bounded wait, and any
//! role-specific periodic tasks. All of them share one cancellation token,
//! so stopping an agent stops everything it spawned, including plans still
//! in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agora_core::AgentId;
use agora_net::{MarketMessage, Transport};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::desire::{Intention, Plan};

/// An agent that can run BDI cycles.
pub trait Deliberator: Send + Sync + 'static {
    /// Plans this agent dispatches.
    type Plan: Plan;

    /// Agent identity.
    fn id(&self) -> &AgentId;

    /// Returns false once the agent has left the market; its cycles then do nothing.
    fn is_active(&self) -> impl Future<Output = bool> + Send {
        async { true }
    }

    /// Revises beliefs before deliberating.
    fn revise(&self) -> impl Future<Output = ()> + Send;

    /// Sends whatever this agent solicits every cycle.
    fn solicit(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Selects this cycle's intention, or `None` if the agent no longer acts.
    fn deliberate(&self) -> impl Future<Output = Option<Intention<Self::Plan>>> + Send;

    /// Runs a plan.
    fn execute(self: Arc<Self>, plan: Self::Plan) -> impl Future<Output = ()> + Send;
}

/// An agent that reacts to inbound messages.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one decoded message.
    fn handle(&self, from: AgentId, message: MarketMessage) -> impl Future<Output = ()> + Send;
}

/// What one cycle dispatched.
#[derive(Debug)]
pub struct CycleReport {
    /// Selected desire.
    pub desire: &'static str,
    /// Dispatched plan.
    pub plan: &'static str,
    /// The running plan.
    pub handle: JoinHandle<()>,
}

/// Runs one revise/solicit/deliberate/dispatch cycle.
///
/// The plan is spawned and not awaited, so the next tick is never delayed
/// by it. Returns `None` when the agent is inactive or selected nothing.
pub async fn run_cycle<D: Deliberator>(agent: &Arc<D>, token: &CancellationToken) -> Option<CycleReport> {
    if !agent.is_active().await {
        trace!(agent = %agent.id(), "inactive, skipping cycle");
        return None;
    }
    agent.revise().await;
    agent.solicit().await;
    let Intention { desire, plan } = agent.deliberate().await?;
    let label = plan.label();
    debug!(agent = %agent.id(), desire, plan = label, "intention selected");

    let token = token.clone();
    let execution = Arc::clone(agent).execute(plan);
    let handle = tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = execution => {}
        }
    });
    Some(CycleReport {
        desire,
        plan: label,
        handle,
    })
}

/// The tasks of one agent.
#[derive(Debug)]
pub struct TaskSet {
    owner: AgentId,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    /// Creates an empty task set.
    #[must_use]
    pub fn new(owner: AgentId) -> Self {
        Self {
            owner,
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of spawned tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if nothing was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns true until shutdown.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Calls `tick` every `period`, first call immediately.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = self.token.clone();
        let owner = self.owner.clone();
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                trace!(agent = %owner, task = name, "tick");
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tick() => {}
                }
            }
            debug!(agent = %owner, task = name, "periodic task stopped");
        }));
    }

    /// Calls `step` back to back until shutdown.
    pub fn spawn_loop<F, Fut>(&mut self, name: &'static str, mut step: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = self.token.clone();
        let owner = self.owner.clone();
        self.handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = step() => {}
                }
            }
            debug!(agent = %owner, task = name, "loop task stopped");
        }));
    }

    /// Deliberates every `period`.
    pub fn spawn_deliberation<D: Deliberator>(&mut self, agent: Arc<D>, period: Duration) {
        let token = self.token.clone();
        self.spawn_periodic("deliberation", period, move || {
            let agent = Arc::clone(&agent);
            let token = token.clone();
            async move {
                let _ = run_cycle(&agent, &token).await;
            }
        });
    }

    /// Receives with a bounded wait and hands decoded messages to `agent`.
    ///
    /// Malformed datagrams are dropped; a timeout just loops.
    pub fn spawn_receiver<H: MessageHandler>(
        &mut self,
        agent: Arc<H>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) {
        self.spawn_loop("receiver", move || {
            let agent = Arc::clone(&agent);
            let transport = Arc::clone(&transport);
            async move {
                let Some(envelope) = transport.recv_timeout(timeout).await else {
                    return;
                };
                if let Some(message) = envelope.open() {
                    agent.handle(envelope.from, message).await;
                }
            }
        });
    }

    /// Cancels every task and waits for them to finish.
    pub async fn shutdown(&mut self) {
        self.token.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    debug!(agent = %self.owner, error = %e, "task ended abnormally");
                }
            }
        }
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agora_net::InProcessNetwork;

    #[derive(Debug)]
    struct Noop;

    impl Plan for Noop {
        fn label(&self) -> &'static str {
            "noop"
        }
    }

    struct Counter {
        id: AgentId,
        revised: AtomicUsize,
        executed: AtomicUsize,
        handled: AtomicUsize,
        stop_after: usize,
    }

    fn counter(stop_after: usize) -> Counter {
        Counter {
            id: AgentId::from("counter"),
            revised: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            handled: AtomicUsize::new(0),
            stop_after,
        }
    }

    impl Deliberator for Counter {
        type Plan = Noop;

        fn id(&self) -> &AgentId {
            &self.id
        }

        async fn revise(&self) {
            self.revised.fetch_add(1, Ordering::SeqCst);
        }

        async fn deliberate(&self) -> Option<Intention<Noop>> {
            (self.revised.load(Ordering::SeqCst) <= self.stop_after).then_some(Intention {
                desire: "count",
                plan: Noop,
            })
        }

        async fn execute(self: Arc<Self>, _plan: Noop) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl MessageHandler for Counter {
        async fn handle(&self, _from: AgentId, _message: MarketMessage) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cycle_dispatches_one_plan() {
        let agent = Arc::new(counter(10));
        let token = CancellationToken::new();
        let report = run_cycle(&agent, &token).await.unwrap();
        assert_eq!(report.desire, "count");
        assert_eq!(report.plan, "noop");
        report.handle.await.unwrap();
        assert_eq!(agent.executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactive_agent_dispatches_nothing() {
        let agent = Arc::new(counter(0));
        agent.revised.store(5, Ordering::SeqCst);
        assert!(run_cycle(&agent, &CancellationToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn periodic_task_ticks_until_shutdown() {
        let agent = Arc::new(counter(100));
        let mut tasks = TaskSet::new(AgentId::from("counter"));
        tasks.spawn_deliberation(Arc::clone(&agent), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(55)).await;
        tasks.shutdown().await;
        let revised = agent.revised.load(Ordering::SeqCst);
        assert!((2..=8).contains(&revised), "revised {revised} times");
        assert!(!tasks.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agent.revised.load(Ordering::SeqCst), revised);
    }

    #[tokio::test]
    async fn receiver_hands_over_valid_messages_only() {
        let network = InProcessNetwork::new();
        let sender = network.register(AgentId::from("a"));
        let endpoint: Arc<dyn Transport> = Arc::new(network.register(AgentId::from("b")));
        let agent = Arc::new(counter(0));

        let mut tasks = TaskSet::new(AgentId::from("b"));
        tasks.spawn_receiver(Arc::clone(&agent), endpoint, Duration::from_millis(5));

        sender.send(&AgentId::from("b"), &MarketMessage::request()).await.unwrap();
        network
            .deliver(agora_net::Envelope {
                from: AgentId::from("a"),
                to: AgentId::from("b"),
                body: b"nope".to_vec(),
            })
            .unwrap();
        sender.send(&AgentId::from("b"), &MarketMessage::request()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        tasks.shutdown().await;
        assert_eq!(agent.handled.load(Ordering::SeqCst), 2);
    }
}
