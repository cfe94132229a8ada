//! Event bus - lifecycle events, operator commands, and telemetry
//!
//! A process-wide publish/subscribe channel. Delivery is at-least-once per
//! subscriber, so every handler must be idempotent under redelivery.
//! Ordering is guaranteed only within a single publisher's stream, never
//! globally across publishers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::telemetry::Telemetry;
use super::DEFAULT_BUS_CAPACITY;

/// Everything that travels on the mesh event bus
///
/// Lifecycle events are published by the node manager; commands are directed
/// at it; telemetry comes from an external collector. Serialized with a
/// `type` discriminator field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeshEvent {
    /// A node record was created (Pending)
    NodeCreated {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A node's record changed without a connectivity transition
    NodeUpdated {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A node was retired permanently
    NodeRemoved {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A node went offline
    NodeDisconnected {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// A node (re)entered Active state
    NodeActivated {
        #[serde(rename = "nodeId")]
        node_id: String,
    },

    /// Command: create or reactivate a node
    BootNode {
        #[serde(rename = "nodeId")]
        node_id: String,
        host: String,
        port: u16,
        #[serde(default)]
        services: Vec<String>,
    },
    /// Command: take a node offline
    ShutdownNode {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// Command: pause an Active node
    SuspendNode {
        #[serde(rename = "nodeId")]
        node_id: String,
    },

    /// A point telemetry observation for one node
    Telemetry(Telemetry),
}

impl MeshEvent {
    /// The node this event concerns
    pub fn node_id(&self) -> &str {
        match self {
            MeshEvent::NodeCreated { node_id }
            | MeshEvent::NodeUpdated { node_id }
            | MeshEvent::NodeRemoved { node_id }
            | MeshEvent::NodeDisconnected { node_id }
            | MeshEvent::NodeActivated { node_id }
            | MeshEvent::BootNode { node_id, .. }
            | MeshEvent::ShutdownNode { node_id }
            | MeshEvent::SuspendNode { node_id } => node_id,
            MeshEvent::Telemetry(sample) => &sample.node_id,
        }
    }

    /// Whether this is an operator command directed at the node manager
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            MeshEvent::BootNode { .. } | MeshEvent::ShutdownNode { .. } | MeshEvent::SuspendNode { .. }
        )
    }
}

/// Broadcast-backed pub/sub bus for mesh events
///
/// Decouples the daemons from each other: the node manager publishes
/// lifecycle transitions without knowing who consumes them, and the policy
/// daemon reacts without reaching into the manager.
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers
    ///
    /// Returns the number of subscribers that received it; 0 with no
    /// subscribers is not an error.
    pub fn publish(&self, event: MeshEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Create a new subscription receiving all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
