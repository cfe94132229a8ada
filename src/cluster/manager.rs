//! Node manager daemon - the sole writer of node lifecycle state
//!
//! Owns creation, health transitions, and removal of nodes. Every mutation
//! checks the currently stored state first, so redelivered commands settle
//! into no-ops instead of double-applying. Lifecycle events go out on the
//! bus after the registry write that they describe.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::events::{EventBus, MeshEvent};
use super::node::{NodeInfo, NodeState};
use super::registry::{with_deadline, Registry, RegistryError};

/// Errors from lifecycle operations
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Invalid transition for node '{node_id}': {from} -> {attempted}")]
    InvalidTransition {
        node_id: String,
        from: NodeState,
        attempted: NodeState,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Node manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Deadline applied to every registry operation
    pub registry_timeout: Duration,

    /// Bounded write retries before giving up on a registry failure
    pub retry_attempts: u32,

    /// Base backoff between retries, doubled per attempt
    pub retry_backoff: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            registry_timeout: Duration::from_secs(super::REGISTRY_TIMEOUT_SECS),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// The authoritative owner of node lifecycle state
///
/// Holds explicit handles to the store and the bus; there is no ambient
/// global registry anywhere in the crate.
pub struct NodeManager {
    registry: Arc<dyn Registry>,
    bus: Arc<EventBus>,
    config: ManagerConfig,
}

impl NodeManager {
    pub fn new(registry: Arc<dyn Registry>, bus: Arc<EventBus>) -> Self {
        Self::with_config(registry, bus, ManagerConfig::default())
    }

    pub fn with_config(
        registry: Arc<dyn Registry>,
        bus: Arc<EventBus>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            config,
        }
    }

    /// The bus this manager publishes lifecycle events on
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Boot a node: create it as Pending, or reactivate a known node
    ///
    /// A Removed id is never reused; booting one is rejected. Booting an
    /// already-Active node is a no-op so redelivered commands are harmless.
    pub async fn handle_boot(
        &self,
        node_id: &str,
        host: &str,
        port: u16,
        services: &[String],
    ) -> Result<NodeInfo, ManagerError> {
        let existing = self.get(node_id).await?;

        match existing {
            None => {
                let mut node = NodeInfo::new(node_id, host, port);
                for service in services {
                    node.services.insert(service.clone());
                }
                self.persist(node.clone()).await?;
                self.bus.publish(MeshEvent::NodeCreated {
                    node_id: node_id.to_string(),
                });
                info!("Node '{}' created at {}", node_id, node.endpoint());
                Ok(node)
            }
            Some(node) if node.status == NodeState::Removed => Err(ManagerError::InvalidTransition {
                node_id: node_id.to_string(),
                from: NodeState::Removed,
                attempted: NodeState::Active,
            }),
            Some(node) if node.status == NodeState::Active => {
                debug!("Node '{}' already active, boot is a no-op", node_id);
                Ok(node)
            }
            Some(mut node) => {
                self.check_transition(&node, NodeState::Active)?;
                node.status = NodeState::Active;
                node.touch();
                self.persist(node.clone()).await?;
                self.bus.publish(MeshEvent::NodeActivated {
                    node_id: node_id.to_string(),
                });
                info!("Node '{}' activated", node_id);
                Ok(node)
            }
        }
    }

    /// Take a node offline
    ///
    /// No-op (not an error) if the node is already Disconnected, Removed,
    /// or unknown.
    pub async fn handle_shutdown(&self, node_id: &str) -> Result<(), ManagerError> {
        let Some(mut node) = self.get(node_id).await? else {
            debug!("Shutdown for unknown node '{}' ignored", node_id);
            return Ok(());
        };

        if matches!(node.status, NodeState::Disconnected | NodeState::Removed) {
            debug!(
                "Node '{}' already {}, shutdown is a no-op",
                node_id, node.status
            );
            return Ok(());
        }

        node.status = NodeState::Disconnected;
        node.touch();
        self.persist(node).await?;
        self.bus.publish(MeshEvent::NodeDisconnected {
            node_id: node_id.to_string(),
        });
        info!("Node '{}' disconnected", node_id);
        Ok(())
    }

    /// Pause an Active node
    pub async fn handle_suspend(&self, node_id: &str) -> Result<(), ManagerError> {
        let node = self
            .get(node_id)
            .await?
            .ok_or_else(|| ManagerError::NodeNotFound(node_id.to_string()))?;

        if node.status != NodeState::Active {
            return Err(ManagerError::InvalidTransition {
                node_id: node_id.to_string(),
                from: node.status,
                attempted: NodeState::Suspended,
            });
        }

        let mut node = node;
        node.status = NodeState::Suspended;
        node.touch();
        self.persist(node).await?;
        self.bus.publish(MeshEvent::NodeUpdated {
            node_id: node_id.to_string(),
        });
        info!("Node '{}' suspended", node_id);
        Ok(())
    }

    /// Retire a node permanently
    ///
    /// The record stays in the store as a Removed tombstone so the id can
    /// never be reused; `purge` deletes the tombstone when wanted. Removing
    /// an already-Removed node is a no-op.
    pub async fn remove(&self, node_id: &str) -> Result<(), ManagerError> {
        let node = self
            .get(node_id)
            .await?
            .ok_or_else(|| ManagerError::NodeNotFound(node_id.to_string()))?;

        if node.status == NodeState::Removed {
            debug!("Node '{}' already removed", node_id);
            return Ok(());
        }

        let mut node = node;
        node.status = NodeState::Removed;
        node.touch();
        self.persist(node).await?;
        self.bus.publish(MeshEvent::NodeRemoved {
            node_id: node_id.to_string(),
        });
        info!("Node '{}' removed", node_id);
        Ok(())
    }

    /// Delete a Removed tombstone from the store entirely
    ///
    /// Rejected for live nodes: `remove` must come first.
    pub async fn purge(&self, node_id: &str) -> Result<(), ManagerError> {
        match self.get(node_id).await? {
            None => Ok(()),
            Some(node) if node.status.is_terminal() => {
                with_deadline(
                    self.config.registry_timeout,
                    self.registry.remove(node_id),
                )
                .await?;
                info!("Node '{}' purged from registry", node_id);
                Ok(())
            }
            Some(node) => Err(ManagerError::InvalidTransition {
                node_id: node_id.to_string(),
                from: node.status,
                attempted: NodeState::Removed,
            }),
        }
    }

    fn check_transition(&self, node: &NodeInfo, next: NodeState) -> Result<(), ManagerError> {
        if node.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(ManagerError::InvalidTransition {
                node_id: node.node_id.clone(),
                from: node.status,
                attempted: next,
            })
        }
    }

    async fn get(&self, node_id: &str) -> Result<Option<NodeInfo>, RegistryError> {
        with_deadline(self.config.registry_timeout, self.registry.get(node_id)).await
    }

    /// Write a record with bounded retry and backoff
    async fn persist(&self, node: NodeInfo) -> Result<(), RegistryError> {
        let mut backoff = self.config.retry_backoff;
        let mut last_err = None;

        for attempt in 0..self.config.retry_attempts.max(1) {
            match with_deadline(self.config.registry_timeout, self.registry.put(node.clone()))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Registry write for '{}' failed (attempt {}): {}",
                        node.node_id,
                        attempt + 1,
                        e
                    );
                    last_err = Some(e);
                    if attempt + 1 < self.config.retry_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| RegistryError::Unavailable("write failed".to_string())))
    }
}

/// Spawn the command loop as a background task
///
/// Consumes boot/shutdown/suspend commands from the bus. A rejected command
/// is logged and the loop moves on; a single failure never brings the
/// daemon down. Returns the shutdown handle.
pub fn spawn_node_manager(manager: Arc<NodeManager>) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    let mut events = manager.bus().subscribe();

    tokio::spawn(async move {
        info!("Node manager daemon started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(MeshEvent::BootNode { node_id, host, port, services }) => {
                        if let Err(e) = manager.handle_boot(&node_id, &host, port, &services).await {
                            warn!("Boot command for '{}' rejected: {}", node_id, e);
                        }
                    }
                    Ok(MeshEvent::ShutdownNode { node_id }) => {
                        if let Err(e) = manager.handle_shutdown(&node_id).await {
                            warn!("Shutdown command for '{}' failed: {}", node_id, e);
                        }
                    }
                    Ok(MeshEvent::SuspendNode { node_id }) => {
                        if let Err(e) = manager.handle_suspend(&node_id).await {
                            warn!("Suspend command for '{}' rejected: {}", node_id, e);
                        }
                    }
                    // Lifecycle and telemetry events are other daemons' concern
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Command stream lagged, {} events skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.changed() => {
                    info!("Node manager daemon shutting down");
                    break;
                }
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::registry::MemoryRegistry;

    fn make_manager() -> (NodeManager, Arc<MemoryRegistry>, Arc<EventBus>) {
        let registry = Arc::new(MemoryRegistry::new());
        let bus = Arc::new(EventBus::new(64));
        let manager = NodeManager::new(registry.clone(), bus.clone());
        (manager, registry, bus)
    }

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_boot_creates_pending_node() {
        let (manager, registry, bus) = make_manager();
        let mut rx = bus.subscribe();

        let node = manager
            .handle_boot("n1", "10.0.0.1", 9000, &services(&["api"]))
            .await
            .unwrap();

        assert_eq!(node.status, NodeState::Pending);
        assert!(node.serves("api"));
        assert_eq!(
            registry.get("n1").await.unwrap().unwrap().status,
            NodeState::Pending
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            MeshEvent::NodeCreated { .. }
        ));
    }

    #[tokio::test]
    async fn test_second_boot_activates() {
        let (manager, _, bus) = make_manager();
        manager
            .handle_boot("n1", "10.0.0.1", 9000, &services(&["api"]))
            .await
            .unwrap();

        let mut rx = bus.subscribe();
        let node = manager
            .handle_boot("n1", "10.0.0.1", 9000, &[])
            .await
            .unwrap();

        assert_eq!(node.status, NodeState::Active);
        assert!(matches!(
            rx.recv().await.unwrap(),
            MeshEvent::NodeActivated { .. }
        ));
    }

    #[tokio::test]
    async fn test_boot_on_active_is_noop() {
        let (manager, _, bus) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();

        let mut rx = bus.subscribe();
        let node = manager.handle_boot("n1", "h", 1, &[]).await.unwrap();

        assert_eq!(node.status, NodeState::Active);
        // No event published for the redundant boot
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_boot_rejected_for_removed_id() {
        let (manager, _, _) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        manager.remove("n1").await.unwrap();

        let result = manager.handle_boot("n1", "h", 1, &[]).await;
        assert!(matches!(
            result,
            Err(ManagerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let (manager, registry, bus) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();

        let mut rx = bus.subscribe();
        manager.handle_shutdown("n1").await.unwrap();

        assert_eq!(
            registry.get("n1").await.unwrap().unwrap().status,
            NodeState::Disconnected
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            MeshEvent::NodeDisconnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_noop_when_unknown_or_down() {
        let (manager, _, bus) = make_manager();

        // Unknown node: quietly accepted
        manager.handle_shutdown("ghost").await.unwrap();

        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        manager.handle_shutdown("n1").await.unwrap();

        // Redelivered shutdown publishes nothing new
        let mut rx = bus.subscribe();
        manager.handle_shutdown("n1").await.unwrap();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_suspend_requires_active() {
        let (manager, registry, _) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();

        // Pending node cannot be suspended
        let result = manager.handle_suspend("n1").await;
        assert!(matches!(
            result,
            Err(ManagerError::InvalidTransition { .. })
        ));
        // State unchanged by the rejected command
        assert_eq!(
            registry.get("n1").await.unwrap().unwrap().status,
            NodeState::Pending
        );
    }

    #[tokio::test]
    async fn test_suspend_then_reactivate() {
        let (manager, registry, _) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();

        manager.handle_suspend("n1").await.unwrap();
        assert_eq!(
            registry.get("n1").await.unwrap().unwrap().status,
            NodeState::Suspended
        );

        // Suspending twice is invalid, not idempotent
        let result = manager.handle_suspend("n1").await;
        assert!(matches!(
            result,
            Err(ManagerError::InvalidTransition { .. })
        ));

        // Boot reactivates a suspended node
        let node = manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        assert_eq!(node.status, NodeState::Active);
    }

    #[tokio::test]
    async fn test_remove_is_terminal() {
        let (manager, registry, _) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();
        manager.remove("n1").await.unwrap();

        // Tombstone retained
        assert_eq!(
            registry.get("n1").await.unwrap().unwrap().status,
            NodeState::Removed
        );

        // Every later command fails or no-ops; state never leaves Removed
        assert!(manager.handle_boot("n1", "h", 1, &[]).await.is_err());
        assert!(manager.handle_suspend("n1").await.is_err());
        manager.handle_shutdown("n1").await.unwrap();
        manager.remove("n1").await.unwrap();
        assert_eq!(
            registry.get("n1").await.unwrap().unwrap().status,
            NodeState::Removed
        );
    }

    #[tokio::test]
    async fn test_purge_deletes_tombstone_only() {
        let (manager, registry, _) = make_manager();
        manager.handle_boot("n1", "h", 1, &[]).await.unwrap();

        // Live node refuses to be purged
        assert!(matches!(
            manager.purge("n1").await,
            Err(ManagerError::InvalidTransition { .. })
        ));

        manager.remove("n1").await.unwrap();
        manager.purge("n1").await.unwrap();
        assert!(registry.get("n1").await.unwrap().is_none());

        // Purging an absent id stays idempotent
        manager.purge("n1").await.unwrap();
    }

    #[tokio::test]
    async fn test_daemon_consumes_bus_commands() {
        let (manager, registry, bus) = make_manager();
        let manager = Arc::new(manager);
        let shutdown = spawn_node_manager(manager);

        bus.publish(MeshEvent::BootNode {
            node_id: "n1".to_string(),
            host: "10.0.0.1".to_string(),
            port: 9000,
            services: vec!["api".to_string()],
        });

        // Wait for the daemon to apply the command
        let mut booted = false;
        for _ in 0..50 {
            if registry.get("n1").await.unwrap().is_some() {
                booted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(booted, "daemon did not apply boot command");

        drop(shutdown);
    }
}
