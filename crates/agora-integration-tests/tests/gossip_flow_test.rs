//! Catalog gossip between adaptive sellers, end to end over the network.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agora_agent::beliefs::keys;
use agora_agent::{
    AdaptiveSeller, GossipOutcome, MarketContext, MessageHandler, SellerProfile, StandardSeller, TaskSet,
};
use agora_core::{ActionKind, AgentId, Catalog, GossipMode, Location, MarketConfig, SaleRecord};
use agora_net::{InProcessNetwork, MarketMessage, Transport};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;

// ============================================================================
// Helper Functions
// ============================================================================

const RECV: Duration = Duration::from_millis(5);

fn profile(ctx: &MarketContext, at: Location, variants: &[(&str, &str)]) -> SellerProfile {
    let catalog: Catalog = variants
        .iter()
        .map(|(product, variant)| ((*product).to_string(), ctx.varieties.entry_for(variant, 300).unwrap()))
        .collect();
    SellerProfile { location: at, catalog }
}

fn sale(variant: &str, qty: u32) -> SaleRecord {
    SaleRecord {
        client_id: AgentId::from("buyer-000"),
        action: ActionKind::GeneralPurchase,
        purchased: BTreeMap::from([(variant.to_string(), qty)]),
        timestamp: Utc::now(),
    }
}

fn adaptive(
    ctx: &MarketContext,
    network: &Arc<InProcessNetwork>,
    id: &str,
    peers: &[&str],
    profile: &SellerProfile,
    tasks: &mut Vec<TaskSet>,
) -> Arc<AdaptiveSeller> {
    let transport: Arc<dyn Transport> = Arc::new(network.register(AgentId::from(id)));
    let seller = Arc::new(AdaptiveSeller::new(
        profile,
        ctx.clone(),
        Arc::clone(&transport),
        peers.iter().map(|p| AgentId::from(*p)).collect(),
        StdRng::seed_from_u64(3),
    ));
    let mut set = TaskSet::new(AgentId::from(id));
    set.spawn_receiver(Arc::clone(&seller), transport, RECV);
    tasks.push(set);
    seller
}

async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn knows_peer(seller: &AdaptiveSeller, peer: &str) -> bool {
    seller
        .beliefs()
        .lock()
        .await
        .peer_metrics(keys::PEER_METRICS)
        .is_some_and(|m| m.contains_key(&AgentId::from(peer)))
}

async fn epoch_received(seller: &AdaptiveSeller, expected: usize) -> bool {
    seller
        .beliefs()
        .lock()
        .await
        .forwarded_sales(keys::EPOCH_RECEIVED_SALES)
        .is_some_and(|s| s.len() == expected)
}

async fn recent_sales(seller: &AdaptiveSeller, expected: usize) -> bool {
    seller
        .beliefs()
        .lock()
        .await
        .sales(keys::RECENT_SALES)
        .is_some_and(|s| s.len() == expected)
}

async fn has_pending_sale(seller: &StandardSeller) -> bool {
    seller
        .beliefs()
        .lock()
        .await
        .sales(keys::PENDING_SALES)
        .is_some_and(|s| s.len() == 1)
}

async fn catalog_of(seller: &AdaptiveSeller) -> Catalog {
    seller
        .beliefs()
        .snapshot()
        .await
        .catalog(keys::CATALOG)
        .cloned()
        .unwrap_or_default()
}

async fn shutdown(tasks: &mut [TaskSet]) {
    for set in tasks {
        set.shutdown().await;
    }
}

// ============================================================================
// Attraction mode
// ============================================================================

#[tokio::test]
async fn idle_seller_adopts_busier_peer_catalog() {
    let ctx = MarketContext::default();
    let network = InProcessNetwork::new();
    let buyer = network.register(AgentId::from("buyer-000"));
    let mut tasks = Vec::new();

    let a_profile = profile(&ctx, Location::new(0.0, 0.0), &[("Pan", "Pan_1"), ("Leche", "Leche_1")]);
    let b_profile = profile(&ctx, Location::new(50.0, 50.0), &[("Pan", "Pan_5"), ("Leche", "Leche_4")]);
    let a = adaptive(&ctx, &network, "adaptive-a", &["adaptive-b"], &a_profile, &mut tasks);
    let b = adaptive(&ctx, &network, "adaptive-b", &["adaptive-a"], &b_profile, &mut tasks);

    for _ in 0..5 {
        buyer
            .send(&AgentId::from("adaptive-b"), &MarketMessage::Sale(sale("Pan_5", 1)))
            .await
            .unwrap();
    }
    assert!(wait_until(|| recent_sales(&b, 5)).await);

    assert_eq!(b.broadcast_metrics().await, 1);
    assert!(wait_until(|| knows_peer(&a, "adaptive-b")).await);
    let broadcast_catalog = catalog_of(&b).await;

    let outcome = a.close_epoch().await;
    assert_eq!(
        outcome,
        GossipOutcome::Adopted {
            from: AgentId::from("adaptive-b"),
            own_sales: 0,
            peer_sales: 5,
        }
    );
    assert_eq!(catalog_of(&a).await, broadcast_catalog);
    assert_eq!(catalog_of(&a).await.get("Pan").unwrap().stock, 295);

    assert_eq!(ctx.log.records_of(ActionKind::AdoptCatalog).len(), 1);
    assert!(ctx.log.records_of(ActionKind::RotateAssortment).is_empty());
    let record = &ctx.log.records_of(ActionKind::AdoptCatalog)[0];
    assert_eq!(record.payload["origen"], "adaptive-b");
    assert_eq!(record.payload["ventas_origen"], 5);

    shutdown(&mut tasks).await;
}

#[tokio::test]
async fn equal_sales_do_not_trigger_adoption() {
    let ctx = MarketContext::default();
    let network = InProcessNetwork::new();
    let mut tasks = Vec::new();
    let a_profile = profile(&ctx, Location::new(0.0, 0.0), &[("Pan", "Pan_1")]);
    let b_profile = profile(&ctx, Location::new(1.0, 1.0), &[("Pan", "Pan_2")]);
    let a = adaptive(&ctx, &network, "adaptive-a", &["adaptive-b"], &a_profile, &mut tasks);
    let b = adaptive(&ctx, &network, "adaptive-b", &["adaptive-a"], &b_profile, &mut tasks);

    a.handle(AgentId::from("buyer-000"), MarketMessage::Sale(sale("Pan_1", 1))).await;
    b.handle(AgentId::from("buyer-000"), MarketMessage::Sale(sale("Pan_2", 1))).await;
    b.broadcast_metrics().await;
    assert!(wait_until(|| knows_peer(&a, "adaptive-b")).await);

    let outcome = a.close_epoch().await;
    assert_eq!(outcome, GossipOutcome::HistoryUpdated { own_sales: 1 });
    assert_eq!(catalog_of(&a).await.get("Pan").unwrap().variant, "Pan_1");

    shutdown(&mut tasks).await;
}

// ============================================================================
// Reevaluation mode
// ============================================================================

#[tokio::test]
async fn forwarded_nearby_sales_drive_variant_switches() {
    let config = MarketConfig::default().with_gossip_mode(GossipMode::Reevaluation);
    let ctx = MarketContext::new(config);
    let network = InProcessNetwork::new();
    let buyer = network.register(AgentId::from("buyer-000"));
    let mut tasks = Vec::new();

    let smart_profile = profile(&ctx, Location::new(0.0, 0.0), &[("Pan", "Pan_1"), ("Leche", "Leche_1")]);
    let smart = adaptive(&ctx, &network, "adaptive-000", &[], &smart_profile, &mut tasks);

    let mut standard = Vec::new();
    for (id, at, variants) in [
        ("seller-near", Location::new(30.0, 40.0), [("Pan", "Pan_4"), ("Leche", "Leche_1")]),
        ("seller-far", Location::new(900.0, 900.0), [("Pan", "Pan_2"), ("Leche", "Leche_3")]),
    ] {
        let transport: Arc<dyn Transport> = Arc::new(network.register(AgentId::from(id)));
        let seller = Arc::new(StandardSeller::new(
            &profile(&ctx, at, &variants),
            ctx.clone(),
            Arc::clone(&transport),
            vec![AgentId::from("adaptive-000")],
            StdRng::seed_from_u64(5),
        ));
        let mut set = TaskSet::new(AgentId::from(id));
        set.spawn_receiver(Arc::clone(&seller), transport, RECV);
        tasks.push(set);
        standard.push(seller);
    }

    let near = AgentId::from("seller-near");
    let far = AgentId::from("seller-far");
    buyer.send(&near, &MarketMessage::Sale(sale("Pan_4", 3))).await.unwrap();
    buyer.send(&far, &MarketMessage::Sale(sale("Leche_3", 9))).await.unwrap();
    for seller in &standard {
        assert!(wait_until(|| has_pending_sale(seller)).await);
        assert_eq!(seller.forward_pending().await, 1);
    }
    assert!(wait_until(|| epoch_received(&smart, 2)).await);

    let outcome = smart.close_epoch().await;
    let GossipOutcome::Reevaluated { changes, .. } = outcome else {
        panic!("expected a reevaluation, got {outcome:?}");
    };
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].product, "Pan");
    assert_eq!(changes[0].to, "Pan_4");

    let catalog = catalog_of(&smart).await;
    assert_eq!(catalog.get("Pan").unwrap().variant, "Pan_4");
    assert_eq!(catalog.get("Pan").unwrap().stock, 300);
    assert_eq!(catalog.get("Leche").unwrap().variant, "Leche_1");

    assert_eq!(ctx.log.records_of(ActionKind::VariantChange).len(), 1);
    assert_eq!(ctx.log.records_of(ActionKind::CatalogSnapshot).len(), 1);
    assert!(wait_until(|| epoch_received(&smart, 0)).await);

    shutdown(&mut tasks).await;
}
