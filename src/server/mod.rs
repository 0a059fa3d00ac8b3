//! WebSocket relay server module
//!
//! Accepts WebSocket connections and relays every text message to all
//! connected clients.

mod broadcaster;
mod handler;
mod peer;
mod protocol;
mod registry;
mod websocket;

#[allow(unused_imports)]
pub use broadcaster::*;
#[allow(unused_imports)]
pub use handler::*;
#[allow(unused_imports)]
pub use peer::*;
pub use protocol::*;
#[allow(unused_imports)]
pub use registry::*;
pub use websocket::*;
