//! End-to-end control plane tests
//!
//! Drives the real wiring: node manager + policy daemon over a shared
//! in-memory registry and event bus, with the gateway routing against
//! whatever state the daemons have produced.

use std::sync::Arc;
use std::time::Duration;

use meshplane::cluster::policy::{DecayPolicy, MetricTransform, PolicyConfig};
use meshplane::cluster::{
    report, spawn_node_manager, spawn_policy_daemon, EventBus, ManagerError, MemoryRegistry,
    MeshEvent, NodeManager, NodeState, PolicyDaemon, Registry, Telemetry,
};
use meshplane::routing::{
    Gateway, GatewayError, ServiceRequest, ServiceRouter, WeightedRandomBalancer,
    WeightedRoundRobinBalancer,
};

struct Plane {
    registry: Arc<MemoryRegistry>,
    bus: Arc<EventBus>,
    manager: Arc<NodeManager>,
    policy: Arc<PolicyDaemon>,
}

/// Wire a full control plane over a fresh in-memory store
///
/// The policy daemon tracks the "capacity" metric with alpha 1.0 and a
/// direct transform, so a single telemetry sample sets the weight exactly.
fn wire() -> Plane {
    let registry = Arc::new(MemoryRegistry::new());
    let bus = Arc::new(EventBus::new(256));

    let manager = Arc::new(NodeManager::new(registry.clone(), bus.clone()));
    let policy = Arc::new(PolicyDaemon::with_config(
        registry.clone(),
        bus.clone(),
        Box::new(DecayPolicy::new(1.0).with_transform(MetricTransform::Direct)),
        PolicyConfig {
            metric: "capacity".to_string(),
            initial_weight: 1.0,
            registry_timeout: Duration::from_secs(2),
        },
    ));

    Plane {
        registry,
        bus,
        manager,
        policy,
    }
}

fn service_gateway(plane: &Plane, balancer: Arc<dyn meshplane::routing::Balancer>) -> Gateway {
    let registry: Arc<dyn Registry> = plane.registry.clone();
    Gateway::new(Arc::new(ServiceRouter::new(registry)), balancer)
}

async fn boot_active(plane: &Plane, id: &str, host: &str) {
    let services = vec!["api".to_string()];
    plane.manager.handle_boot(id, host, 9000, &services).await.unwrap();
    plane.manager.handle_boot(id, host, 9000, &services).await.unwrap();
}

/// Scenario: boot a node, then route a request for its service
#[tokio::test]
async fn booted_node_is_routable() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;

    let node = plane.registry.get("n1").await.unwrap().unwrap();
    assert_eq!(node.status, NodeState::Active);
    assert_eq!(node.weight, 1.0);

    let gateway = service_gateway(&plane, Arc::new(WeightedRandomBalancer::with_seed(3)));
    for _ in 0..10 {
        let decision = gateway.handle(&ServiceRequest::new("api")).await.unwrap();
        assert_eq!(decision.node_id, "n1");
        assert_eq!(decision.endpoint(), "10.0.0.1:9000");
    }
}

/// Scenario: telemetry-driven weights feed exact round-robin proportions
#[tokio::test]
async fn telemetry_weights_drive_round_robin_splits() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;
    boot_active(&plane, "n2", "10.0.0.2").await;

    plane
        .policy
        .handle_telemetry(&Telemetry::new("n1", "capacity", 2.0))
        .await;
    plane
        .policy
        .handle_telemetry(&Telemetry::new("n2", "capacity", 1.0))
        .await;

    assert_eq!(plane.registry.get("n1").await.unwrap().unwrap().weight, 2.0);
    assert_eq!(plane.registry.get("n2").await.unwrap().unwrap().weight, 1.0);

    let gateway = service_gateway(&plane, Arc::new(WeightedRoundRobinBalancer::new()));
    let mut n1 = 0;
    let mut n2 = 0;
    for _ in 0..300 {
        match gateway
            .handle(&ServiceRequest::new("api"))
            .await
            .unwrap()
            .node_id
            .as_str()
        {
            "n1" => n1 += 1,
            _ => n2 += 1,
        }
    }

    assert_eq!(n1, 200);
    assert_eq!(n2, 100);
}

/// Scenario: a suspended node stops being routed on the next request
#[tokio::test]
async fn suspended_node_yields_no_route() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;

    let gateway = service_gateway(&plane, Arc::new(WeightedRandomBalancer::with_seed(3)));
    gateway.handle(&ServiceRequest::new("api")).await.unwrap();

    plane.manager.handle_suspend("n1").await.unwrap();

    let result = gateway.handle(&ServiceRequest::new("api")).await;
    assert!(matches!(result, Err(GatewayError::NoRouteAvailable(_))));
}

/// Scenario: suspending a non-Active node is rejected and changes nothing
#[tokio::test]
async fn double_suspend_is_rejected() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;
    plane.manager.handle_suspend("n1").await.unwrap();

    let result = plane.manager.handle_suspend("n1").await;
    assert!(matches!(result, Err(ManagerError::InvalidTransition { .. })));

    let node = plane.registry.get("n1").await.unwrap().unwrap();
    assert_eq!(node.status, NodeState::Suspended);
}

/// A removed id never comes back, whatever commands follow
#[tokio::test]
async fn removed_node_stays_removed() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;
    plane.manager.remove("n1").await.unwrap();

    assert!(plane
        .manager
        .handle_boot("n1", "10.0.0.1", 9000, &[])
        .await
        .is_err());
    assert!(plane.manager.handle_suspend("n1").await.is_err());
    plane.manager.handle_shutdown("n1").await.unwrap();
    plane.manager.remove("n1").await.unwrap();

    let node = plane.registry.get("n1").await.unwrap().unwrap();
    assert_eq!(node.status, NodeState::Removed);

    let gateway = service_gateway(&plane, Arc::new(WeightedRandomBalancer::with_seed(3)));
    let result = gateway.handle(&ServiceRequest::new("api")).await;
    assert!(matches!(result, Err(GatewayError::NoRouteAvailable(_))));
}

/// Duplicate lifecycle deliveries settle into the same final weight
#[tokio::test]
async fn duplicate_created_events_are_idempotent() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;

    plane
        .policy
        .handle_telemetry(&Telemetry::new("n1", "capacity", 5.0))
        .await;

    // Redelivered creation event resets once; a second copy changes nothing
    plane.policy.handle_created("n1").await;
    let first = plane.registry.get("n1").await.unwrap().unwrap().weight;

    plane.policy.handle_created("n1").await;
    let second = plane.registry.get("n1").await.unwrap().unwrap().weight;

    assert_eq!(first, 1.0);
    assert_eq!(first, second);
}

/// Weight zeroed on disconnect keeps the node unselectable even for a
/// balancer holding an older candidate list
#[tokio::test]
async fn disconnect_zeroes_weight() {
    let plane = wire();
    boot_active(&plane, "n1", "10.0.0.1").await;

    plane.manager.handle_shutdown("n1").await.unwrap();
    plane.policy.handle_departed("n1").await;

    let node = plane.registry.get("n1").await.unwrap().unwrap();
    assert_eq!(node.status, NodeState::Disconnected);
    assert_eq!(node.weight, 0.0);

    // Reactivation brings the node back with its weight restored by policy
    plane
        .manager
        .handle_boot("n1", "10.0.0.1", 9000, &[])
        .await
        .unwrap();
    plane
        .policy
        .handle_telemetry(&Telemetry::new("n1", "capacity", 1.0))
        .await;

    let gateway = service_gateway(&plane, Arc::new(WeightedRandomBalancer::with_seed(3)));
    let decision = gateway.handle(&ServiceRequest::new("api")).await.unwrap();
    assert_eq!(decision.node_id, "n1");
}

/// Full event-driven path: commands and telemetry in through the bus only
#[tokio::test]
async fn daemons_drive_state_from_the_bus() {
    let plane = wire();
    let _manager_shutdown = spawn_node_manager(plane.manager.clone());
    let _policy_shutdown = spawn_policy_daemon(plane.policy.clone());

    plane.bus.publish(MeshEvent::BootNode {
        node_id: "n1".to_string(),
        host: "10.0.0.1".to_string(),
        port: 9000,
        services: vec!["api".to_string()],
    });
    plane.bus.publish(MeshEvent::BootNode {
        node_id: "n1".to_string(),
        host: "10.0.0.1".to_string(),
        port: 9000,
        services: vec![],
    });

    wait_for(&plane, |n| n.status == NodeState::Active).await;

    report(&plane.bus, Telemetry::new("n1", "capacity", 4.0));
    wait_for(&plane, |n| (n.weight - 4.0).abs() < 1e-9).await;

    let gateway = service_gateway(&plane, Arc::new(WeightedRandomBalancer::with_seed(3)));
    let decision = gateway.handle(&ServiceRequest::new("api")).await.unwrap();
    assert_eq!(decision.node_id, "n1");

    plane.bus.publish(MeshEvent::SuspendNode {
        node_id: "n1".to_string(),
    });
    wait_for(&plane, |n| n.status == NodeState::Suspended).await;

    let result = gateway.handle(&ServiceRequest::new("api")).await;
    assert!(matches!(result, Err(GatewayError::NoRouteAvailable(_))));
}

async fn wait_for(plane: &Plane, predicate: impl Fn(&meshplane::cluster::NodeInfo) -> bool) {
    for _ in 0..100 {
        if let Some(node) = plane.registry.get("n1").await.unwrap() {
            if predicate(&node) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within the polling window");
}
