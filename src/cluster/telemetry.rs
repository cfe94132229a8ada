//! Telemetry samples reported by an external metrics collector
//!
//! Samples are transient: they ride the event bus, feed the balancing
//! policy daemon, and are never persisted beyond the weight they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{EventBus, MeshEvent};

/// One point observation of a metric on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    /// Metric name, e.g. "latency_ms" or "active_requests"
    pub metric: String,

    /// Node the observation belongs to
    #[serde(rename = "nodeId")]
    pub node_id: String,

    /// When the observation was taken
    pub timestamp: DateTime<Utc>,

    /// Observed value
    pub value: f64,

    /// Optional originating subsystem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsystem: Option<String>,
}

impl Telemetry {
    /// Create a sample stamped with the current time
    pub fn new(node_id: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            node_id: node_id.into(),
            timestamp: Utc::now(),
            value,
            subsystem: None,
        }
    }

    /// Override the observation timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Tag the originating subsystem
    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }
}

/// Ingestion point for the external metrics collector
///
/// Publishes the sample onto the event bus; returns the subscriber count the
/// bus reported.
pub fn report(bus: &EventBus, sample: Telemetry) -> usize {
    bus.publish(MeshEvent::Telemetry(sample))
}
