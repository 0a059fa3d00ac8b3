//! WebSocket connection handler
//!
//! Runs the receive loop of one registered connection: data frames are
//! broadcast to every registered connection, a close frame is acknowledged,
//! and any transport error drops the connection. Whatever the exit path, the
//! connection leaves the registry before the handler returns.

use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::broadcaster::{Broadcaster, Outbound};
use super::peer::Peer;
use super::protocol::{normal_close, Frame};
use super::registry::Registry;

/// Read half of a server-side WebSocket
pub type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Lifecycle of a handled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Handles a single registered WebSocket connection
pub struct ConnectionHandler {
    peer: Arc<Peer>,
    registry: Arc<Registry<Peer>>,
    broadcaster: Broadcaster<Peer>,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Create a handler for a peer that is already in `registry`
    pub fn new(peer: Arc<Peer>, registry: Arc<Registry<Peer>>) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        Self {
            peer,
            registry,
            broadcaster,
            state: ConnectionState::Open,
        }
    }

    /// Current lifecycle state
    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Receive until the connection closes, errors, or shutdown is signalled
    ///
    /// Returns the final state, which is always `Closed`.
    pub async fn run(
        mut self,
        mut stream: WsStream,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> ConnectionState {
        while self.state == ConnectionState::Open {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(message)) => self.on_frame(Frame::from(message)).await,
                        Some(Err(e)) => {
                            warn!("WebSocket error from client {}: {}", self.peer.id(), e);
                            self.drop_connection().await;
                        }
                        None => {
                            info!("Client {} went away", self.peer.id());
                            self.drop_connection().await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing client {}", self.peer.id());
                    self.close().await;
                }
            }
        }

        self.state
    }

    async fn on_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Data(text) => {
                debug!("Received from {}: {}", self.peer.id(), text);
                self.broadcaster.broadcast(&text).await;
            }
            Frame::Close => {
                info!("Client {} requested close", self.peer.id());
                self.close().await;
            }
            Frame::Ignored => {}
        }
    }

    /// Graceful path: send a close frame, then deregister
    async fn close(&mut self) {
        if let Err(e) = self.peer.close(Some(normal_close())).await {
            debug!("Close frame to {} not delivered: {}", self.peer.id(), e);
        }
        self.state = ConnectionState::Closing;
        self.registry.remove(self.peer.id()).await;
        self.state = ConnectionState::Closed;
        info!("Client {} disconnected", self.peer.id());
    }

    /// Abrupt path: deregister without a closing handshake
    async fn drop_connection(&mut self) {
        self.registry.remove(self.peer.id()).await;
        self.state = ConnectionState::Closed;
        info!("Client {} ({}) dropped", self.peer.id(), self.peer.addr());
    }
}
