//! Strand: concurrency and request-attribution core of an HTTP forward proxy.
//!
//! Connections are accepted on an acceptor pool, served for their whole life by
//! one client-to-proxy worker, optionally processed on a separate pinned
//! processing worker, and forwarded by proxy-to-server workers. A
//! [`trace::RequestTracer`] ties every stage back to one request id.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod proxy;
pub mod trace;

pub use config::{Config, ThreadPoolConfig};
pub use connection::{Connection, ConnectionId};
pub use error::{ConfigError, PoolError, ProxyError, UpstreamError};
pub use pipeline::{FilterAction, HttpFilters, NoopFilters};
pub use pool::ProxyThreadPools;
pub use proxy::{ProxyServer, RunningProxy};
pub use trace::{HeaderTracer, NoopTracer, RequestTracer, ResponseHead};
