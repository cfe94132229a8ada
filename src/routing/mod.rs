//! # Request Routing
//!
//! The synchronous request path: Gateway -> Router -> Balancer.
//!
//! A router narrows the registry to the candidate set for one request; a
//! balancer picks a single node from it; the gateway glues the two together
//! and owns the error taxonomy the caller sees. Nothing on this path blocks
//! beyond the deadline-bounded registry read, and nothing is cached between
//! requests.

pub mod balancer;
pub mod gateway;
pub mod request;
pub mod router;

pub use balancer::{
    Balancer, BalancerError, StaticHostBalancer, StaticLocalhostBalancer, WeightedRandomBalancer,
    WeightedRoundRobinBalancer,
};
pub use gateway::{Gateway, GatewayError};
pub use request::{RoutingDecision, ServiceRequest};
pub use router::{HostRouter, Router, ServiceRouter, StaticRouter};
