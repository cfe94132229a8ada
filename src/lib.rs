//! # meshplane
//!
//! A cluster service-mesh control plane: routes service requests to backend
//! nodes through pluggable routers and weighted balancers, and keeps the
//! node pool honest with two cooperating daemons.
//!
//! - [`cluster`] holds the node model, the shared registry, the event bus,
//!   the node manager daemon (lifecycle), and the balancing policy daemon
//!   (telemetry -> weights).
//! - [`routing`] is the synchronous request path: `Gateway -> Router ->
//!   Balancer -> RoutingDecision`.
//! - [`config`] wires both halves from a YAML/JSON manifest.
//!
//! The design is eventually consistent by intent: the request path only
//! reads, the daemons only write their own fields, and the two meet at the
//! registry without locks. A node suspended mid-request is a retryable
//! condition at the caller, not a bug to prevent with coordination.

pub mod cluster;
pub mod config;
pub mod routing;
