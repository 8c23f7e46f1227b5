//! Configuration types for the Strand proxy.

mod listen;
mod thread_pools;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use listen::ListenConfig;
pub use thread_pools::{
    ThreadPoolConfig, DEFAULT_ACCEPTOR_THREADS, DEFAULT_CLIENT_TO_PROXY_PROCESSING_THREADS,
    DEFAULT_CLIENT_TO_PROXY_WORKER_THREADS, DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_GROUP_NAME,
    DEFAULT_PROXY_TO_SERVER_WORKER_THREADS,
};
pub use upstream::UpstreamConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub thread_pools: ThreadPoolConfig,
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.socket_addr()?;
        self.thread_pools.validate()?;
        Ok(())
    }
}
