//! Frame classification
//!
//! The relay carries plain text. Incoming WebSocket messages are reduced to
//! the three cases the handlers care about: data to relay, a close request,
//! or something to ignore.

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Reason sent with every close frame the relay originates
pub const CLOSE_REASON: &str = "Closing";

/// An incoming message, as the relay sees it
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Text to broadcast or display
    Data(String),
    /// Peer asked to close the connection
    Close,
    /// Control or raw frames with no relay meaning
    Ignored,
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Data(text),
            Message::Binary(data) => Frame::Data(String::from_utf8_lossy(&data).into_owned()),
            Message::Close(_) => Frame::Close,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Ignored,
        }
    }
}

/// Normal-closure frame used for close acknowledgements and client hang-ups
pub fn normal_close() -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::Normal,
        reason: CLOSE_REASON.into(),
    }
}
