//! Worker pool topology.
//!
//! Four independent pools, each a fixed set of named threads running one
//! single-threaded event loop apiece:
//!
//! - `acceptor` - accepts client connections
//! - `client-worker` - reads requests; one worker per connection for its lifetime
//! - `client-processor` - optional; runs filters off the read path, one worker per connection
//! - `server-worker` - exchanges requests with upstream servers
//!
//! # Module Structure
//!
//! - `event_loop` - a single worker thread and the group that owns several of them
//! - `affinity` - connection to worker assignment
//! - `topology` - the four pools built from [`crate::config::ThreadPoolConfig`]

mod affinity;
mod event_loop;
mod topology;

pub use affinity::AffinityMap;
pub use event_loop::{EventLoop, EventLoopGroup, Task};
pub use topology::ProxyThreadPools;

/// Logical role of a pool, encoded in its thread names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    Acceptor,
    ClientWorker,
    ClientProcessor,
    ServerWorker,
}

impl PoolRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolRole::Acceptor => "acceptor",
            PoolRole::ClientWorker => "client-worker",
            PoolRole::ClientProcessor => "client-processor",
            PoolRole::ServerWorker => "server-worker",
        }
    }

    /// Configuration option holding this pool's thread count.
    pub fn config_option(&self) -> &'static str {
        match self {
            PoolRole::Acceptor => "acceptor_threads",
            PoolRole::ClientWorker => "client_to_proxy_worker_threads",
            PoolRole::ClientProcessor => "client_to_proxy_worker_processing_threads",
            PoolRole::ServerWorker => "proxy_to_server_worker_threads",
        }
    }

    /// Thread name for worker `index` of this role: `<group>-<role>-<index>`.
    pub fn thread_name(&self, group: &str, index: usize) -> String {
        format!("{group}-{}-{index}", self.as_str())
    }
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
