//! Routers - turn a service request into a candidate node set
//!
//! A router never picks the final destination; it narrows the registry down
//! to the nodes eligible for this request and leaves the choice to a
//! balancer. An empty candidate set is a valid, non-error result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::request::ServiceRequest;
use crate::cluster::{with_deadline, NodeInfo, Registry, RegistryError, REGISTRY_TIMEOUT_SECS};

/// Candidate-set selection contract
///
/// Registry failures propagate: a router must never turn an unreachable
/// store into an empty candidate list.
#[async_trait]
pub trait Router: Send + Sync {
    /// Candidate nodes for this request, possibly empty
    async fn route(&self, request: &ServiceRequest) -> Result<Vec<NodeInfo>, RegistryError>;

    /// The router name, for logs
    fn name(&self) -> &'static str;
}

/// Fixed candidate list, registry ignored
///
/// Used for host overrides and bypass deployments where the candidate set
/// is part of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticRouter {
    nodes: Vec<NodeInfo>,
}

impl StaticRouter {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl Router for StaticRouter {
    async fn route(&self, _request: &ServiceRequest) -> Result<Vec<NodeInfo>, RegistryError> {
        Ok(self.nodes.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Filters registry nodes by the request's host hint
///
/// The service name is ignored; this router exists for "send it to that
/// machine" overrides. A request without a hint gets no candidates.
pub struct HostRouter {
    registry: Arc<dyn Registry>,
    timeout: Duration,
}

impl HostRouter {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(REGISTRY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Router for HostRouter {
    async fn route(&self, request: &ServiceRequest) -> Result<Vec<NodeInfo>, RegistryError> {
        let Some(host) = request.host_hint.as_deref() else {
            return Ok(vec![]);
        };

        let nodes = with_deadline(self.timeout, self.registry.list(None)).await?;
        Ok(nodes.into_iter().filter(|n| n.host == host).collect())
    }

    fn name(&self) -> &'static str {
        "host"
    }
}

/// Filters registry nodes to Active members of the requested service
///
/// The standard production router: only nodes that claim the service and
/// are currently Active become candidates.
pub struct ServiceRouter {
    registry: Arc<dyn Registry>,
    timeout: Duration,
}

impl ServiceRouter {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(REGISTRY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Router for ServiceRouter {
    async fn route(&self, request: &ServiceRequest) -> Result<Vec<NodeInfo>, RegistryError> {
        let nodes = with_deadline(
            self.timeout,
            self.registry.list(Some(&request.service_name)),
        )
        .await?;
        Ok(nodes.into_iter().filter(|n| n.is_active()).collect())
    }

    fn name(&self) -> &'static str {
        "service"
    }
}
