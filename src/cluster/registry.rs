//! Cluster registry - the shared keyed store for node records
//!
//! The registry is the only shared mutable resource in the control plane.
//! It is implementation-agnostic: anything with per-key atomic upserts can
//! back it. All mutation follows a single-writer-per-field convention (the
//! node manager owns lifecycle fields, the policy daemon owns `weight`), so
//! callers never lock it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::node::{ClusterInfo, NodeInfo};

/// Errors surfaced by registry operations
///
/// An unavailable store must never be silently converted into an empty node
/// list: that would turn an outage into a false "no nodes available" routing
/// failure. Callers surface the error or retry with backoff.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Keyed store contract for node records
///
/// All operations are atomic per key; concurrent `put`s resolve
/// last-writer-wins. `remove` is idempotent.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch a node by id. `Ok(None)` means not found.
    async fn get(&self, node_id: &str) -> Result<Option<NodeInfo>, RegistryError>;

    /// Upsert a node record by its `node_id`.
    async fn put(&self, node: NodeInfo) -> Result<(), RegistryError>;

    /// Delete a node record. Deleting an absent id is not an error.
    async fn remove(&self, node_id: &str) -> Result<(), RegistryError>;

    /// List node records, filtered by service membership when given.
    async fn list(&self, service: Option<&str>) -> Result<Vec<NodeInfo>, RegistryError>;
}

/// Apply a bounded deadline to a registry operation
///
/// A timed-out operation fails fast as `Unavailable` instead of hanging the
/// caller. Because `put` is a single-key atomic replace, a timeout can never
/// leave a partial write behind.
pub async fn with_deadline<T, F>(deadline: Duration, op: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Unavailable(format!(
            "operation timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}

/// Recompute the derived per-service cluster view from current store state
pub async fn gather_cluster_info(
    registry: &dyn Registry,
    service: &str,
) -> Result<ClusterInfo, RegistryError> {
    let nodes = registry.list(Some(service)).await?;
    Ok(ClusterInfo::from_nodes(service, nodes))
}

/// In-memory registry backed by a concurrent map
///
/// The reference implementation. Per-key atomicity comes directly from the
/// map's entry locking; a `put` replaces the whole record in one step.
#[derive(Default)]
pub struct MemoryRegistry {
    nodes: DashMap<String, NodeInfo>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }

    /// Number of records currently stored
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get(&self, node_id: &str) -> Result<Option<NodeInfo>, RegistryError> {
        Ok(self.nodes.get(node_id).map(|r| r.clone()))
    }

    async fn put(&self, node: NodeInfo) -> Result<(), RegistryError> {
        self.nodes.insert(node.node_id.clone(), node);
        Ok(())
    }

    async fn remove(&self, node_id: &str) -> Result<(), RegistryError> {
        self.nodes.remove(node_id);
        Ok(())
    }

    async fn list(&self, service: Option<&str>) -> Result<Vec<NodeInfo>, RegistryError> {
        let nodes = self
            .nodes
            .iter()
            .filter(|r| service.map(|s| r.serves(s)).unwrap_or(true))
            .map(|r| r.clone())
            .collect();
        Ok(nodes)
    }
}
