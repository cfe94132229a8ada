//! Request and decision value types for the routing path
//!
//! Both are per-request and ephemeral: a `ServiceRequest` is consumed by
//! exactly one router, and a `RoutingDecision` goes straight back to the
//! caller. Neither is ever persisted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::NodeInfo;

/// An inbound routing query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// The service being requested
    #[serde(rename = "serviceName")]
    pub service_name: String,

    /// Optional host override hint
    #[serde(rename = "hostHint", skip_serializing_if = "Option::is_none")]
    pub host_hint: Option<String>,

    /// Optional caller-supplied affinity key
    #[serde(rename = "routingKey", skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

impl ServiceRequest {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            host_hint: None,
            routing_key: None,
        }
    }

    pub fn with_host_hint(mut self, host: impl Into<String>) -> Self {
        self.host_hint = Some(host.into());
        self
    }

    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }
}

/// The destination chosen for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Correlation id for tracing this decision through logs
    #[serde(rename = "decisionId")]
    pub decision_id: Uuid,

    /// Chosen node
    #[serde(rename = "nodeId")]
    pub node_id: String,

    /// Destination host
    pub host: String,

    /// Destination port
    pub port: u16,
}

impl RoutingDecision {
    /// Build a decision pointing at the given node
    pub fn for_node(node: &NodeInfo) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            node_id: node.node_id.clone(),
            host: node.host.clone(),
            port: node.port,
        }
    }

    /// The full destination address (host:port)
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
