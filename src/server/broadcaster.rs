//! Broadcast fan-out
//!
//! Sends one message to every connection in the registry concurrently.
//! A failed send is logged and skipped; removing the dead connection is left
//! to its own handler.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

use super::registry::{ConnectionId, Registry};

/// Write side of a connection, as seen by the broadcaster
pub trait Outbound: Send + Sync + 'static {
    /// Id the connection is registered under
    fn id(&self) -> ConnectionId;

    /// Send a single text frame
    fn send_text(&self, text: &str) -> impl Future<Output = Result<(), WsError>> + Send;
}

/// Fans messages out to all registered connections
pub struct Broadcaster<H> {
    registry: Arc<Registry<H>>,
}

impl<H> Clone for Broadcaster<H> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<H: Outbound> Broadcaster<H> {
    /// Create a broadcaster over the given registry
    pub fn new(registry: Arc<Registry<H>>) -> Self {
        Self { registry }
    }

    /// Send `message` to every connection registered at call time
    ///
    /// Returns once every send has completed or failed. Failures are not
    /// reported to the caller.
    pub async fn broadcast(&self, message: &str) {
        let targets = self.registry.snapshot().await;
        let total = targets.len();

        let results = join_all(targets.iter().map(|handle| async move {
            let result = handle.send_text(message).await;
            if let Err(e) = &result {
                debug!("Send to {} failed: {}", handle.id(), e);
            }
            result.is_ok()
        }))
        .await;

        let delivered = results.into_iter().filter(|ok| *ok).count();
        debug!("Broadcast delivered to {}/{} connections", delivered, total);
    }
}
