//! Server-side connection handle
//!
//! Owns the write half of an upgraded WebSocket. Broadcast sends and the
//! handler's close acknowledgement can race, so writes go through a mutex.

use std::net::SocketAddr;

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::broadcaster::Outbound;
use super::registry::ConnectionId;

/// Write half of a server-side WebSocket
pub type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// A registered connection
pub struct Peer {
    id: ConnectionId,
    addr: SocketAddr,
    sink: Mutex<WsSink>,
}

impl Peer {
    pub fn new(id: ConnectionId, addr: SocketAddr, sink: WsSink) -> Self {
        Self {
            id,
            addr,
            sink: Mutex::new(sink),
        }
    }

    /// Remote address of the connection
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a close frame
    pub async fn close(&self, frame: Option<CloseFrame<'static>>) -> Result<(), WsError> {
        self.sink.lock().await.send(Message::Close(frame)).await
    }
}

impl Outbound for Peer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), WsError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_owned()))
            .await
    }
}
