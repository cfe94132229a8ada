//! Balancing policy daemon - converts telemetry into node weights
//!
//! Subscribes to telemetry and lifecycle events and maintains the `weight`
//! field of node records. A missed weight update is a minor degradation,
//! not a correctness failure, so registry write errors are logged and the
//! next sample repairs the state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::events::{EventBus, MeshEvent};
use super::node::NodeState;
use super::registry::{with_deadline, Registry};
use super::telemetry::Telemetry;
use super::DEFAULT_WEIGHT;

/// How a raw metric value maps onto a goodness score
///
/// `Inverse` suits metrics where smaller is better (latency, queue depth):
/// a zero reading scores 1.0 and large readings approach 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricTransform {
    /// Use the value as-is (floored at 0)
    Direct,
    /// `1 / (1 + value)`, for lower-is-better metrics
    Inverse,
}

impl MetricTransform {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            MetricTransform::Direct => value.max(0.0),
            MetricTransform::Inverse => 1.0 / (1.0 + value.max(0.0)),
        }
    }
}

/// Rule set for folding one telemetry sample into a node's weight
pub trait BalancingPolicy: Send + Sync {
    /// Compute the new weight from the current weight and a fresh sample.
    /// Implementations must return a value >= 0.
    fn update(&self, current: f64, sample: &Telemetry) -> f64;

    /// The policy name, for logs
    fn name(&self) -> &'static str;
}

/// Reference policy: exponentially-decayed moving average
///
/// `weight' = (1 - alpha) * weight + alpha * transform(value)`, floored
/// at 0. Higher alpha reacts faster; lower alpha smooths harder.
#[derive(Debug, Clone)]
pub struct DecayPolicy {
    alpha: f64,
    transform: MetricTransform,
}

impl DecayPolicy {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            transform: MetricTransform::Inverse,
        }
    }

    pub fn with_transform(mut self, transform: MetricTransform) -> Self {
        self.transform = transform;
        self
    }
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl BalancingPolicy for DecayPolicy {
    fn update(&self, current: f64, sample: &Telemetry) -> f64 {
        let score = self.transform.apply(sample.value);
        ((1.0 - self.alpha) * current + self.alpha * score).max(0.0)
    }

    fn name(&self) -> &'static str {
        "decay"
    }
}

/// Policy daemon configuration
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// The telemetry metric that drives weights; other metrics are ignored
    pub metric: String,

    /// Weight assigned when a node is created
    pub initial_weight: f64,

    /// Deadline applied to every registry operation
    pub registry_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            metric: "latency_ms".to_string(),
            initial_weight: DEFAULT_WEIGHT,
            registry_timeout: Duration::from_secs(super::REGISTRY_TIMEOUT_SECS),
        }
    }
}

/// The sole writer of the `weight` field on node records
pub struct PolicyDaemon {
    registry: Arc<dyn Registry>,
    bus: Arc<EventBus>,
    policy: Box<dyn BalancingPolicy>,
    config: PolicyConfig,
}

impl PolicyDaemon {
    pub fn new(
        registry: Arc<dyn Registry>,
        bus: Arc<EventBus>,
        policy: Box<dyn BalancingPolicy>,
    ) -> Self {
        Self::with_config(registry, bus, policy, PolicyConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn Registry>,
        bus: Arc<EventBus>,
        policy: Box<dyn BalancingPolicy>,
        config: PolicyConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            policy,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Fold one telemetry sample into the node's weight
    ///
    /// Samples for unknown or Removed nodes are dropped: telemetry and
    /// lifecycle streams are unordered relative to each other, and a late
    /// sample must never resurrect a retired node.
    pub async fn handle_telemetry(&self, sample: &Telemetry) {
        if sample.metric != self.config.metric {
            return;
        }

        let node = match self.get(&sample.node_id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                debug!(
                    "Dropping telemetry for unknown node '{}'",
                    sample.node_id
                );
                return;
            }
            Err(e) => {
                warn!("Skipping telemetry for '{}': {}", sample.node_id, e);
                return;
            }
        };

        if node.status == NodeState::Removed {
            debug!("Dropping telemetry for removed node '{}'", sample.node_id);
            return;
        }

        let mut node = node;
        let new_weight = self.policy.update(node.weight, sample);
        debug!(
            "Policy '{}' moves weight of '{}' from {:.4} to {:.4}",
            self.policy.name(),
            node.node_id,
            node.weight,
            new_weight
        );
        node.weight = new_weight;
        self.write_back(node).await;
    }

    /// Initialize the weight of a freshly created node
    ///
    /// Idempotent: a redelivered creation event finds the weight already at
    /// its initial value and writes nothing.
    pub async fn handle_created(&self, node_id: &str) {
        let Ok(Some(node)) = self.get(node_id).await else {
            return;
        };

        if (node.weight - self.config.initial_weight).abs() < f64::EPSILON {
            return;
        }

        let mut node = node;
        node.weight = self.config.initial_weight;
        self.write_back(node).await;
    }

    /// Zero the weight of a node that left the routable pool
    ///
    /// Routers filtering by status would exclude it anyway; zeroing the
    /// weight also stops weighted balancers that saw an older candidate
    /// list from picking it. Idempotent on redelivery.
    pub async fn handle_departed(&self, node_id: &str) {
        let Ok(Some(node)) = self.get(node_id).await else {
            return;
        };

        if node.weight == 0.0 {
            return;
        }

        let mut node = node;
        node.weight = 0.0;
        self.write_back(node).await;
    }

    async fn get(
        &self,
        node_id: &str,
    ) -> Result<Option<super::node::NodeInfo>, super::registry::RegistryError> {
        with_deadline(self.config.registry_timeout, self.registry.get(node_id)).await
    }

    /// Persist a weight change; failures are logged, never raised.
    /// The next telemetry tick recomputes from current state anyway.
    async fn write_back(&self, node: super::node::NodeInfo) {
        let node_id = node.node_id.clone();
        if let Err(e) =
            with_deadline(self.config.registry_timeout, self.registry.put(node)).await
        {
            warn!("Weight update for '{}' not persisted: {}", node_id, e);
        }
    }
}

/// Spawn the policy loop as a background task
pub fn spawn_policy_daemon(daemon: Arc<PolicyDaemon>) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    let mut events = daemon.bus().subscribe();

    tokio::spawn(async move {
        info!("Balancing policy daemon started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(MeshEvent::Telemetry(sample)) => {
                        daemon.handle_telemetry(&sample).await;
                    }
                    Ok(MeshEvent::NodeCreated { node_id }) => {
                        daemon.handle_created(&node_id).await;
                    }
                    Ok(MeshEvent::NodeDisconnected { node_id })
                    | Ok(MeshEvent::NodeRemoved { node_id }) => {
                        daemon.handle_departed(&node_id).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Policy event stream lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.changed() => {
                    info!("Balancing policy daemon shutting down");
                    break;
                }
            }
        }
    });

    shutdown_tx
}
