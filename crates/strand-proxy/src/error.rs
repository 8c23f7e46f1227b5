//! Error types for the proxy core.
//!
//! Configuration problems surface synchronously from validation and topology
//! construction; pool and upstream errors are reported per operation and never
//! cross connection boundaries.

use std::time::Duration;

use crate::pool::PoolRole;

/// Invalid or unreadable configuration. Fatal to startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("'{option}' must be a positive integer, got {value}")]
    InvalidThreadCount { option: &'static str, value: usize },
    #[error("thread group name must not be empty")]
    EmptyGroupName,
    #[error("invalid listen address '{0}'")]
    InvalidListenAddress(String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failures of the thread-pool topology.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build event loop runtime for {role} worker {index}: {source}")]
    Runtime {
        role: PoolRole,
        index: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("event loop {0} is shut down")]
    Stopped(String),
}

/// Failures of a single exchange with the origin server.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request has no upstream host")]
    MissingHost,
    #[error("unsupported upstream scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("connect to {authority} timed out after {timeout:?}")]
    ConnectTimeout { authority: String, timeout: Duration },
    #[error("connect to {authority} failed: {source}")]
    Connect {
        authority: String,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream protocol error: {0}")]
    Http(#[from] hyper::Error),
}

/// Top-level error returned by [`crate::proxy::ProxyServer`] lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
