//! Configuration module
//!
//! Handles the relay address and its optional TOML file.

mod relay;

pub use relay::*;
