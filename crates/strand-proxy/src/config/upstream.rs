//! Proxy-to-server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Timeout for establishing the TCP connection to the origin server
    pub connect_timeout_ms: u64,
    /// Initial transparency flag of every accepted connection. Transparent
    /// connections have tracing headers stripped before they leave the proxy.
    pub transparent: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            transparent: false,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
