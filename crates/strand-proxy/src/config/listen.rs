//! Listener configuration.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Socket address the acceptor pool listens on; port 0 picks a free port
    pub address: String,
    /// Listen backlog handed to the OS
    pub backlog: i32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            backlog: 1024,
        }
    }
}

impl ListenConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddress(self.address.clone()))
    }
}
