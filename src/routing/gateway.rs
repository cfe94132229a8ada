//! Gateway - the request-handling façade over a router/balancer pair
//!
//! Every call re-reads current registry state through the router; there is
//! no decision caching, so weight and status changes take effect on the
//! very next request.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::balancer::{Balancer, BalancerError};
use super::request::{RoutingDecision, ServiceRequest};
use super::router::Router;
use crate::cluster::RegistryError;

/// Errors surfaced to the gateway's caller
///
/// All three are surfaced synchronously and retried (or not) by the caller;
/// the gateway itself never retries.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The router produced zero candidates. A normal outcome under low
    /// availability, retryable by the caller.
    #[error("No route available for service '{0}'")]
    NoRouteAvailable(String),

    /// Candidates existed but none was selectable
    #[error(transparent)]
    NoEligibleNode(#[from] BalancerError),

    /// The store could not be reached; never masked as an empty route
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Composes one router and one balancer into the request path
pub struct Gateway {
    router: Arc<dyn Router>,
    balancer: Arc<dyn Balancer>,
}

impl Gateway {
    pub fn new(router: Arc<dyn Router>, balancer: Arc<dyn Balancer>) -> Self {
        Self { router, balancer }
    }

    /// Resolve one request to a destination
    pub async fn handle(&self, request: &ServiceRequest) -> Result<RoutingDecision, GatewayError> {
        let candidates = self.router.route(request).await?;

        if candidates.is_empty() {
            return Err(GatewayError::NoRouteAvailable(request.service_name.clone()));
        }

        let node = self.balancer.select(&candidates)?;
        let decision = RoutingDecision::for_node(&node);

        debug!(
            "Decision {} for service '{}': {} via {}/{} ({} candidate(s))",
            decision.decision_id,
            request.service_name,
            decision.endpoint(),
            self.router.name(),
            self.balancer.name(),
            candidates.len()
        );

        Ok(decision)
    }
}
