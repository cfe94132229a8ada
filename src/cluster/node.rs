//! Node model - represents one addressable backend in the mesh
//!
//! A node is a machine instance capable of serving one or more named
//! services. Each node:
//! - Is created and lifecycle-managed by the node manager daemon
//! - Carries a mutable selection weight maintained by the policy daemon
//! - Is read by routers and balancers on every routing decision

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DEFAULT_WEIGHT;

/// A single cluster member record, keyed by `node_id` in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier
    #[serde(rename = "nodeId")]
    pub node_id: String,

    /// Address where this node can be reached
    pub host: String,

    /// Port the node serves on
    pub port: u16,

    /// Current lifecycle state
    pub status: NodeState,

    /// Relative selection weight, always >= 0. A weight of 0 makes the
    /// node ineligible for weighted balancing without changing its status.
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Names of the services this node can serve
    #[serde(default)]
    pub services: BTreeSet<String>,

    /// When the node was last created/updated by its owning daemon
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

/// Lifecycle state of a node
///
/// Valid transitions:
/// `Pending -> Active -> {Suspended, Disconnected} -> Active` (reactivation),
/// with `Removed` terminal from any non-Removed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeState {
    /// Created but not yet serving traffic
    #[default]
    Pending,
    /// Healthy and eligible for routing
    Active,
    /// Administratively paused
    Suspended,
    /// Lost contact / shut down
    Disconnected,
    /// Permanently retired. Terminal.
    Removed,
}

impl NodeState {
    /// Whether a transition from `self` to `next` is allowed by the
    /// lifecycle state machine. Self-transitions are not listed here;
    /// handlers treat them as no-ops before consulting this table.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (Removed, _) => false,
            (_, Removed) => true,
            (Pending, Active) => true,
            (Suspended, Active) | (Disconnected, Active) => true,
            (Active, Suspended) => true,
            (Pending, Disconnected) | (Active, Disconnected) | (Suspended, Disconnected) => true,
            _ => false,
        }
    }

    /// Whether this state is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Removed)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Pending => "Pending",
            NodeState::Active => "Active",
            NodeState::Suspended => "Suspended",
            NodeState::Disconnected => "Disconnected",
            NodeState::Removed => "Removed",
        };
        f.write_str(s)
    }
}

impl NodeInfo {
    /// Create a new Pending node with the default weight
    pub fn new(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            status: NodeState::Pending,
            weight: DEFAULT_WEIGHT,
            services: BTreeSet::new(),
            last_seen: Utc::now(),
        }
    }

    /// Add a service this node can serve
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }

    /// Set the selection weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.max(0.0);
        self
    }

    /// Set the lifecycle state
    pub fn with_status(mut self, status: NodeState) -> Self {
        self.status = status;
        self
    }

    /// The full address (host:port)
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether this node is currently eligible for routing
    pub fn is_active(&self) -> bool {
        self.status == NodeState::Active
    }

    /// Whether this node serves the given service name
    pub fn serves(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    /// Refresh the last-seen timestamp
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Check whether the record has not been touched within the threshold
    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        (Utc::now() - self.last_seen).num_seconds() > threshold_secs
    }
}

/// Aggregate view over all nodes registered for one service
///
/// Derived and read-only: recomputed on demand from the registry, never
/// persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// The service this view aggregates
    #[serde(rename = "serviceName")]
    pub service_name: String,

    /// All registered nodes claiming the service, any status
    pub nodes: Vec<NodeInfo>,
}

impl ClusterInfo {
    /// Build the view from an already-fetched node list
    pub fn from_nodes(service_name: impl Into<String>, nodes: Vec<NodeInfo>) -> Self {
        Self {
            service_name: service_name.into(),
            nodes,
        }
    }

    /// Nodes currently eligible for routing
    pub fn active_nodes(&self) -> Vec<&NodeInfo> {
        self.nodes.iter().filter(|n| n.is_active()).collect()
    }

    /// Sum of weights across active nodes
    pub fn total_active_weight(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.is_active())
            .map(|n| n.weight)
            .sum()
    }

    /// Whether at least one active node with positive weight exists
    pub fn is_routable(&self) -> bool {
        self.nodes.iter().any(|n| n.is_active() && n.weight > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_node() {
        let node = NodeInfo::new("n1", "10.0.0.1", 9000);

        assert_eq!(node.node_id, "n1");
        assert_eq!(node.host, "10.0.0.1");
        assert_eq!(node.port, 9000);
        assert_eq!(node.status, NodeState::Pending);
        assert_eq!(node.weight, 1.0);
        assert!(node.services.is_empty());
    }

    #[test]
    fn test_node_builder() {
        let node = NodeInfo::new("n1", "10.0.0.1", 9000)
            .with_service("api")
            .with_service("admin")
            .with_weight(2.5);

        assert!(node.serves("api"));
        assert!(node.serves("admin"));
        assert!(!node.serves("billing"));
        assert_eq!(node.weight, 2.5);
    }

    #[test]
    fn test_weight_floored_at_zero() {
        let node = NodeInfo::new("n1", "h", 1).with_weight(-3.0);
        assert_eq!(node.weight, 0.0);
    }

    #[test]
    fn test_endpoint() {
        let node = NodeInfo::new("n1", "192.168.1.100", 8080);
        assert_eq!(node.endpoint(), "192.168.1.100:8080");
    }

    #[test]
    fn test_transition_matrix() {
        use NodeState::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Suspended));
        assert!(Active.can_transition_to(Disconnected));
        assert!(Suspended.can_transition_to(Active));
        assert!(Disconnected.can_transition_to(Active));
        assert!(Suspended.can_transition_to(Disconnected));

        // Removed is reachable from everywhere but terminal
        assert!(Pending.can_transition_to(Removed));
        assert!(Active.can_transition_to(Removed));
        assert!(Suspended.can_transition_to(Removed));
        assert!(Disconnected.can_transition_to(Removed));
        assert!(!Removed.can_transition_to(Active));
        assert!(!Removed.can_transition_to(Pending));
        assert!(!Removed.can_transition_to(Removed));

        // Nothing goes back to Pending, and Suspended requires Active
        assert!(!Active.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Suspended));
        assert!(!Disconnected.can_transition_to(Suspended));
    }

    #[test]
    fn test_staleness() {
        let mut node = NodeInfo::new("n1", "h", 1);
        assert!(!node.is_stale(60));

        node.last_seen = Utc::now() - chrono::Duration::seconds(120);
        assert!(node.is_stale(60));

        node.touch();
        assert!(!node.is_stale(60));
    }

    #[test]
    fn test_cluster_info_aggregates() {
        let cluster = ClusterInfo::from_nodes(
            "api",
            vec![
                NodeInfo::new("n1", "h1", 1)
                    .with_service("api")
                    .with_status(NodeState::Active)
                    .with_weight(2.0),
                NodeInfo::new("n2", "h2", 1)
                    .with_service("api")
                    .with_status(NodeState::Active)
                    .with_weight(1.0),
                NodeInfo::new("n3", "h3", 1)
                    .with_service("api")
                    .with_status(NodeState::Suspended)
                    .with_weight(5.0),
            ],
        );

        assert_eq!(cluster.active_nodes().len(), 2);
        assert_eq!(cluster.total_active_weight(), 3.0);
        assert!(cluster.is_routable());
    }

    #[test]
    fn test_cluster_info_not_routable_when_weights_zero() {
        let cluster = ClusterInfo::from_nodes(
            "api",
            vec![NodeInfo::new("n1", "h1", 1)
                .with_status(NodeState::Active)
                .with_weight(0.0)],
        );

        assert!(!cluster.is_routable());
        assert_eq!(cluster.active_nodes().len(), 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let node = NodeInfo::new("n1", "10.0.0.1", 9000).with_service("api");
        let json = serde_json::to_string(&node).unwrap();

        assert!(json.contains("\"nodeId\":\"n1\""));
        assert!(json.contains("\"lastSeen\""));

        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_id, node.node_id);
        assert_eq!(back.status, NodeState::Pending);
    }
}
