//! Relay client module
//!
//! Connects to a relay server, sends typed lines and prints what arrives.

mod session;

pub use session::*;
