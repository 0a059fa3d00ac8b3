//! WebSocket relay server
//!
//! Accepts TCP connections, upgrades them to WebSockets, registers each one
//! under a fresh id and hands it to a [`ConnectionHandler`]. Upgrades and
//! handlers run in their own tasks so the accept loop never waits on a client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handler::ConnectionHandler;
use super::peer::Peer;
use super::registry::Registry;
use crate::config::RelayConfig;

/// How long shutdown waits for handlers to close their connections
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Errors that stop the relay server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Broadcast relay over WebSocket
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<Registry<Peer>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(Registry::new()),
            shutdown_tx,
        }
    }

    /// Registry of live connections
    #[cfg(test)]
    pub fn registry(&self) -> &Arc<Registry<Peer>> {
        &self.registry
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> ServerResult<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        info!("Listening on ws://{}/", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let registry = Arc::clone(&self.registry);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(handle_connection(stream, peer_addr, registry, shutdown_rx));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Wait, up to [`SHUTDOWN_GRACE`], for every handler to send its close
    /// frame and deregister
    async fn drain(&self) {
        let remaining = self.registry.len().await;
        if remaining == 0 {
            return;
        }
        info!("Closing {} active connections", remaining);

        let drained = timeout(SHUTDOWN_GRACE, async {
            while !self.registry.is_empty().await {
                sleep(DRAIN_POLL).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {:?}",
                self.registry.len().await,
                SHUTDOWN_GRACE
            );
        }
    }
}

/// Upgrade one accepted connection and run its handler
///
/// A failed upgrade abandons only this connection.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<Registry<Peer>>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("New connection from {}", peer_addr);

    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("WebSocket upgrade from {} failed: {}", peer_addr, e);
            return;
        }
    };

    let id = Uuid::new_v4();
    let (sink, stream) = ws_stream.split();
    let peer = Arc::new(Peer::new(id, peer_addr, sink));
    registry.add(id, Arc::clone(&peer)).await;
    info!("Client {} connected from {}", id, peer_addr);

    ConnectionHandler::new(peer, registry)
        .run(stream, shutdown_rx)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::runtime::Runtime;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(3);

    async fn start_server() -> (Arc<RelayServer>, SocketAddr, JoinHandle<ServerResult<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RelayServer::new(RelayConfig::default()));
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };
        (server, addr, task)
    }

    async fn connect(addr: SocketAddr) -> ClientStream {
        connect_async(format!("ws://{}/", addr)).await.unwrap().0
    }

    /// Poll until the registry reaches `expected` connections
    async fn wait_for_len(server: &RelayServer, expected: usize) {
        timeout(WAIT, async {
            while server.registry().len().await != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {} connections", expected));
    }

    async fn next_text(client: &mut ClientStream) -> String {
        loop {
            let msg = timeout(WAIT, client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn test_peers_receive_each_others_messages() {
        let (server, addr, _task) = start_server().await;
        let mut alice = connect(addr).await;
        let mut bob = connect(addr).await;
        let mut carol = connect(addr).await;
        wait_for_len(&server, 3).await;

        alice
            .send(Message::Text("hello".to_string()))
            .await
            .unwrap();

        assert_eq!(next_text(&mut bob).await, "hello");
        assert_eq!(next_text(&mut carol).await, "hello");
        assert_eq!(next_text(&mut alice).await, "hello");
        assert!(timeout(Duration::from_millis(200), bob.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnected_peer_is_removed() {
        let (server, addr, _task) = start_server().await;
        let mut alice = connect(addr).await;
        let mut bob = connect(addr).await;
        wait_for_len(&server, 2).await;

        bob.close(None).await.unwrap();
        wait_for_len(&server, 1).await;

        alice
            .send(Message::Text("still there?".to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut alice).await, "still there?");
    }

    #[tokio::test]
    async fn test_non_websocket_connection_does_not_stop_server() {
        let (server, addr, _task) = start_server().await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        let _ = timeout(WAIT, raw.read_to_end(&mut buf)).await;
        assert!(server.registry().is_empty().await);

        let mut alice = connect(addr).await;
        wait_for_len(&server, 1).await;
        alice
            .send(Message::Text("ping".to_string()))
            .await
            .unwrap();
        assert_eq!(next_text(&mut alice).await, "ping");
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop_and_closes_clients() {
        let (server, addr, task) = start_server().await;
        let mut alice = connect(addr).await;
        wait_for_len(&server, 1).await;

        server.shutdown();

        let result = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(result.is_ok());

        let frame = timeout(WAIT, alice.next()).await.unwrap();
        assert!(matches!(frame, Some(Ok(Message::Close(_)))));
        wait_for_len(&server, 0).await;
    }

    #[test]
    fn test_clients_are_closed_before_server_runtime_exits() {
        let server_rt = Runtime::new().unwrap();
        let client_rt = Runtime::new().unwrap();
        let server = Arc::new(RelayServer::new(RelayConfig::default()));

        let listener = server_rt
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let serving = Arc::clone(&server);
        let server_thread = std::thread::spawn(move || {
            let result = server_rt.block_on(serving.serve(listener));
            // Same as main returning: detached handler tasks die here
            drop(server_rt);
            result
        });

        let mut alice = client_rt.block_on(async {
            let alice = connect(addr).await;
            wait_for_len(&server, 1).await;
            alice
        });

        server.shutdown();
        assert!(server_thread.join().unwrap().is_ok());

        let frame = client_rt.block_on(async { timeout(WAIT, alice.next()).await.unwrap() });
        assert!(matches!(frame, Some(Ok(Message::Close(_)))));
        assert!(client_rt.block_on(server.registry().is_empty()));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = RelayServer::new(RelayConfig::new("127.0.0.1", port));

        let result = server.run().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
