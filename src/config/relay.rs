//! Relay configuration
//!
//! Address shared by the server (bind) and the client (connect), optionally
//! loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default host for both listening and connecting
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port for both listening and connecting
pub const DEFAULT_PORT: u16 = 5000;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Network address of the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl RelayConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Load configuration from a TOML file
    ///
    /// Keys missing from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Address to bind the listener to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL clients connect to
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}
