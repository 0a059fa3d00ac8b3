//! Connection registry
//!
//! Thread-safe map from connection id to the write handle of every live
//! WebSocket connection. Handlers insert themselves once upgraded and remove
//! themselves when their connection closes; the broadcaster iterates over
//! snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque identifier assigned to a connection at accept time
pub type ConnectionId = Uuid;

/// Registry of open connection handles
///
/// Handles are stored behind `Arc` so a snapshot can be iterated (and sent to)
/// without holding the registry lock.
pub struct Registry<H> {
    connections: RwLock<HashMap<ConnectionId, Arc<H>>>,
}

impl<H> Registry<H> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handle under a fresh id
    pub async fn add(&self, id: ConnectionId, handle: Arc<H>) {
        self.connections.write().await.insert(id, handle);
    }

    /// Remove a handle. Returns whether it was present.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    /// Point-in-time copy of all registered handles
    pub async fn snapshot(&self) -> Vec<Arc<H>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Check if a connection is registered
    #[cfg(test)]
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connections are registered
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
