//! Mesh configuration - file-driven wiring of the control plane
//!
//! A single manifest (YAML or JSON) declares the registry limits, bus
//! sizing, balancing policy, and which router/balancer pair the gateway
//! composes. Every field has a sensible default so an empty document is a
//! valid config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::policy::{BalancingPolicy, DecayPolicy, MetricTransform, PolicyConfig};
use crate::cluster::{ManagerConfig, NodeInfo, NodeState, Registry, DEFAULT_WEIGHT};
use crate::routing::{
    Balancer, Gateway, HostRouter, Router, ServiceRouter, StaticHostBalancer,
    StaticLocalhostBalancer, StaticRouter, WeightedRandomBalancer, WeightedRoundRobinBalancer,
};

/// Errors from loading or validating a config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level mesh configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// Registry access limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Deadline for any single store operation, in seconds
    #[serde(rename = "timeoutSecs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Bounded write retries in the daemons
    #[serde(rename = "retryAttempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry backoff in milliseconds, doubled per attempt
    #[serde(rename = "retryBackoffMs", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    crate::cluster::REGISTRY_TIMEOUT_SECS
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl RegistrySettings {
    /// Node manager settings derived from this section
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            registry_timeout: Duration::from_secs(self.timeout_secs),
            retry_attempts: self.retry_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Event bus sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Per-subscriber event buffer
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    crate::cluster::DEFAULT_BUS_CAPACITY
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// Balancing policy selection and tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Telemetry metric that drives weights
    #[serde(default = "default_metric")]
    pub metric: String,

    /// Decay factor of the moving average, in [0, 1]
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// "inverse" for lower-is-better metrics, "direct" otherwise
    #[serde(default = "default_transform")]
    pub transform: String,

    /// Weight given to freshly created nodes
    #[serde(rename = "initialWeight", default = "default_initial_weight")]
    pub initial_weight: f64,
}

fn default_metric() -> String {
    "latency_ms".to_string()
}

fn default_alpha() -> f64 {
    0.3
}

fn default_transform() -> String {
    "inverse".to_string()
}

fn default_initial_weight() -> f64 {
    DEFAULT_WEIGHT
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            alpha: default_alpha(),
            transform: default_transform(),
            initial_weight: default_initial_weight(),
        }
    }
}

impl PolicySettings {
    /// Policy daemon settings derived from this section
    pub fn policy_config(&self, registry: &RegistrySettings) -> PolicyConfig {
        PolicyConfig {
            metric: self.metric.clone(),
            initial_weight: self.initial_weight,
            registry_timeout: Duration::from_secs(registry.timeout_secs),
        }
    }

    /// Build the configured policy implementation
    pub fn build_policy(&self) -> Box<dyn BalancingPolicy> {
        let transform = if self.transform == "direct" {
            MetricTransform::Direct
        } else {
            MetricTransform::Inverse
        };
        Box::new(DecayPolicy::new(self.alpha).with_transform(transform))
    }
}

/// Which router variant the gateway uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouterKind {
    #[default]
    Service,
    Host,
    Static,
}

/// Which balancer variant the gateway uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    #[default]
    WeightedRandom,
    WeightedRoundRobin,
    StaticHost,
    StaticLocalhost,
}

/// A fixed node entry for static routing/balancing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNodeEntry {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_initial_weight")]
    pub weight: f64,
    #[serde(default)]
    pub services: Vec<String>,
}

impl StaticNodeEntry {
    fn to_node(&self) -> NodeInfo {
        let mut node = NodeInfo::new(&self.node_id, &self.host, self.port)
            .with_status(NodeState::Active)
            .with_weight(self.weight);
        for service in &self.services {
            node.services.insert(service.clone());
        }
        node
    }
}

/// Gateway wiring: router + balancer pair and their static inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default)]
    pub router: RouterKind,

    #[serde(default)]
    pub balancer: BalancerKind,

    /// Candidates for the static router
    #[serde(rename = "staticNodes", default)]
    pub static_nodes: Vec<StaticNodeEntry>,

    /// Target for the static-host balancer
    #[serde(rename = "staticTarget", default)]
    pub static_target: Option<StaticNodeEntry>,

    /// Port for the static-localhost balancer
    #[serde(rename = "localhostPort", default = "default_localhost_port")]
    pub localhost_port: u16,
}

fn default_localhost_port() -> u16 {
    8080
}

impl MeshConfig {
    /// Check cross-field consistency; messages are meant to be actionable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.timeoutSecs must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.policy.alpha) {
            return Err(ConfigError::Invalid(format!(
                "policy.alpha must be within [0, 1], got {}",
                self.policy.alpha
            )));
        }
        if self.policy.transform != "inverse" && self.policy.transform != "direct" {
            return Err(ConfigError::Invalid(format!(
                "policy.transform must be \"inverse\" or \"direct\", got \"{}\"",
                self.policy.transform
            )));
        }
        if self.policy.initial_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "policy.initialWeight must not be negative".to_string(),
            ));
        }
        if self.bus.capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.capacity must be at least 1".to_string(),
            ));
        }
        if self.gateway.balancer == BalancerKind::StaticHost
            && self.gateway.static_target.is_none()
        {
            return Err(ConfigError::Invalid(
                "gateway.staticTarget is required for the static_host balancer".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured router over the given store
    pub fn build_router(&self, registry: Arc<dyn Registry>) -> Arc<dyn Router> {
        let timeout = Duration::from_secs(self.registry.timeout_secs);
        match self.gateway.router {
            RouterKind::Service => Arc::new(ServiceRouter::new(registry).with_timeout(timeout)),
            RouterKind::Host => Arc::new(HostRouter::new(registry).with_timeout(timeout)),
            RouterKind::Static => Arc::new(StaticRouter::new(
                self.gateway.static_nodes.iter().map(|n| n.to_node()).collect(),
            )),
        }
    }

    /// Build the configured balancer
    pub fn build_balancer(&self) -> Arc<dyn Balancer> {
        match self.gateway.balancer {
            BalancerKind::WeightedRandom => Arc::new(WeightedRandomBalancer::new()),
            BalancerKind::WeightedRoundRobin => Arc::new(WeightedRoundRobinBalancer::new()),
            BalancerKind::StaticHost => {
                let target = self
                    .gateway
                    .static_target
                    .as_ref()
                    .expect("validated: static_host requires a target")
                    .to_node();
                Arc::new(StaticHostBalancer::new(target))
            }
            BalancerKind::StaticLocalhost => {
                Arc::new(StaticLocalhostBalancer::new(self.gateway.localhost_port))
            }
        }
    }

    /// Compose the gateway from the configured pair
    pub fn build_gateway(&self, registry: Arc<dyn Registry>) -> Gateway {
        Gateway::new(self.build_router(registry), self.build_balancer())
    }
}

/// Load and validate a config file, dispatching on the file extension
pub fn load_config_file(path: &Path) -> Result<MeshConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let config: MeshConfig = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
    } else {
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
    };

    config.validate()?;
    Ok(config)
}
