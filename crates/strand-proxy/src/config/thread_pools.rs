//! Thread pool sizing for the proxy topology.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_ACCEPTOR_THREADS: usize = 2;
pub const DEFAULT_CLIENT_TO_PROXY_WORKER_THREADS: usize = 8;
/// Processing pool size when separate processing is enabled without an explicit count.
/// Independent of the read pool so the read/process ratio can be tuned.
pub const DEFAULT_CLIENT_TO_PROXY_PROCESSING_THREADS: usize = 8;
pub const DEFAULT_PROXY_TO_SERVER_WORKER_THREADS: usize = 8;
pub const DEFAULT_GROUP_NAME: &str = "strand";
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5000;

/// Sizes and naming of the four worker pools.
///
/// Acceptor threads accept connections and hand them to client-to-proxy workers.
/// Client-to-proxy workers read requests and, unless `separate_processing_event_loop`
/// is set, also run the processing stage. Proxy-to-server workers exchange requests
/// with upstream servers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Prefix of every worker thread name (`<group>-<role>-<index>`)
    pub group_name: String,
    pub acceptor_threads: usize,
    pub client_to_proxy_worker_threads: usize,
    /// Only used when `separate_processing_event_loop` is true
    pub client_to_proxy_worker_processing_threads: usize,
    pub proxy_to_server_worker_threads: usize,
    pub separate_processing_event_loop: bool,
    /// Upper bound for in-flight work to finish when a pool stops
    pub drain_timeout_ms: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_string(),
            acceptor_threads: DEFAULT_ACCEPTOR_THREADS,
            client_to_proxy_worker_threads: DEFAULT_CLIENT_TO_PROXY_WORKER_THREADS,
            client_to_proxy_worker_processing_threads: DEFAULT_CLIENT_TO_PROXY_PROCESSING_THREADS,
            proxy_to_server_worker_threads: DEFAULT_PROXY_TO_SERVER_WORKER_THREADS,
            separate_processing_event_loop: false,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl ThreadPoolConfig {
    pub fn with_group_name(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    pub fn with_acceptor_threads(mut self, threads: usize) -> Self {
        self.acceptor_threads = threads;
        self
    }

    pub fn with_client_to_proxy_worker_threads(mut self, threads: usize) -> Self {
        self.client_to_proxy_worker_threads = threads;
        self
    }

    /// Takes effect only together with [`Self::with_separate_processing_event_loop`].
    pub fn with_client_to_proxy_worker_processing_threads(mut self, threads: usize) -> Self {
        self.client_to_proxy_worker_processing_threads = threads;
        self
    }

    pub fn with_proxy_to_server_worker_threads(mut self, threads: usize) -> Self {
        self.proxy_to_server_worker_threads = threads;
        self
    }

    pub fn with_separate_processing_event_loop(mut self, separate: bool) -> Self {
        self.separate_processing_event_loop = separate;
        self
    }

    pub fn with_drain_timeout_ms(mut self, drain_timeout_ms: u64) -> Self {
        self.drain_timeout_ms = drain_timeout_ms;
        self
    }

    /// Reject non-positive thread counts and an empty group name.
    ///
    /// The processing count is checked only when separate processing is enabled,
    /// since it is ignored otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_name.trim().is_empty() {
            return Err(ConfigError::EmptyGroupName);
        }

        let mut counts = vec![
            ("acceptor_threads", self.acceptor_threads),
            (
                "client_to_proxy_worker_threads",
                self.client_to_proxy_worker_threads,
            ),
            (
                "proxy_to_server_worker_threads",
                self.proxy_to_server_worker_threads,
            ),
        ];
        if self.separate_processing_event_loop {
            counts.push((
                "client_to_proxy_worker_processing_threads",
                self.client_to_proxy_worker_processing_threads,
            ));
        }

        for (option, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidThreadCount { option, value });
            }
        }
        Ok(())
    }
}
