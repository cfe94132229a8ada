//! # Mesh Cluster Core
//!
//! Node lifecycle, the shared registry, and the event plumbing that keeps
//! routing decisions current.
//!
//! ## Architecture
//!
//! ```text
//!   operator commands            telemetry collector
//!        │                              │
//!        ▼                              ▼
//!  ┌───────────────────── event bus ─────────────────────┐
//!  │  BootNode / ShutdownNode / SuspendNode / Telemetry  │
//!  └──────┬───────────────────────────────┬──────────────┘
//!         ▼                               ▼
//!  ┌──────────────┐                ┌───────────────┐
//!  │ node manager │── lifecycle ──▶│ policy daemon │
//!  │   daemon     │     events     │  (weights)    │
//!  └──────┬───────┘                └──────┬────────┘
//!         │         ┌──────────┐          │
//!         └────────▶│ registry │◀─────────┘
//!                   └────┬─────┘
//!                        │ reads, every request
//!                        ▼
//!              routers / balancers / gateway
//! ```
//!
//! Ownership is split by field, not by lock: the node manager daemon is the
//! only writer of lifecycle state, the policy daemon is the only writer of
//! weights, and the request path only reads. The registry is the single
//! shared mutable resource and is never locked by callers.

pub mod events;
pub mod manager;
pub mod node;
pub mod policy;
pub mod registry;
pub mod telemetry;

pub use events::{EventBus, MeshEvent};
pub use manager::{spawn_node_manager, ManagerConfig, ManagerError, NodeManager};
pub use node::{ClusterInfo, NodeInfo, NodeState};
pub use policy::{
    spawn_policy_daemon, BalancingPolicy, DecayPolicy, MetricTransform, PolicyConfig, PolicyDaemon,
};
pub use registry::{gather_cluster_info, with_deadline, MemoryRegistry, Registry, RegistryError};
pub use telemetry::{report, Telemetry};

/// Weight assigned to nodes that have not yet received a policy decision
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Default per-subscriber event buffer of the bus
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Default deadline for registry operations, in seconds
pub const REGISTRY_TIMEOUT_SECS: u64 = 2;
