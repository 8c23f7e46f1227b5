//! The proxy's four worker pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

use super::{EventLoopGroup, PoolRole};
use crate::config::ThreadPoolConfig;
use crate::connection::ConnectionId;
use crate::error::PoolError;

/// Acceptor, client-to-proxy worker, optional processing, and proxy-to-server pools.
///
/// The processing pool exists only when `separate_processing_event_loop` is set;
/// otherwise processing runs on the client-to-proxy worker that read the request.
pub struct ProxyThreadPools {
    acceptor: EventLoopGroup,
    client_worker: EventLoopGroup,
    client_processor: Option<EventLoopGroup>,
    server_worker: EventLoopGroup,
    stopped: AtomicBool,
}

impl ProxyThreadPools {
    /// Validate `config` and start every pool.
    ///
    /// Pools already started are stopped again if a later one fails, so an
    /// error never leaves threads behind.
    pub fn new(config: &ThreadPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let group = config.group_name.as_str();
        let drain = Duration::from_millis(config.drain_timeout_ms);

        // Dropping a partially built set of groups shuts them down
        let acceptor = EventLoopGroup::new(PoolRole::Acceptor, group, config.acceptor_threads, drain)?;
        let client_worker = EventLoopGroup::new(
            PoolRole::ClientWorker,
            group,
            config.client_to_proxy_worker_threads,
            drain,
        )?;
        let client_processor = if config.separate_processing_event_loop {
            Some(EventLoopGroup::new(
                PoolRole::ClientProcessor,
                group,
                config.client_to_proxy_worker_processing_threads,
                drain,
            )?)
        } else {
            None
        };
        let server_worker = EventLoopGroup::new(
            PoolRole::ServerWorker,
            group,
            config.proxy_to_server_worker_threads,
            drain,
        )?;

        info!(
            group = group,
            acceptors = acceptor.len(),
            client_workers = client_worker.len(),
            client_processors = client_processor.as_ref().map_or(0, |p| p.len()),
            server_workers = server_worker.len(),
            "Thread pools started"
        );

        Ok(Self {
            acceptor,
            client_worker,
            client_processor,
            server_worker,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn acceptor_pool(&self) -> &EventLoopGroup {
        &self.acceptor
    }

    pub fn client_to_proxy_worker_pool(&self) -> &EventLoopGroup {
        &self.client_worker
    }

    /// `None` unless separate processing is enabled.
    pub fn client_to_proxy_processing_pool(&self) -> Option<&EventLoopGroup> {
        self.client_processor.as_ref()
    }

    pub fn proxy_to_server_worker_pool(&self) -> &EventLoopGroup {
        &self.server_worker
    }

    pub fn is_separate_processing(&self) -> bool {
        self.client_processor.is_some()
    }

    /// Drop a closed connection's processing pinning.
    pub fn release_connection(&self, id: ConnectionId) {
        if let Some(processor) = &self.client_processor {
            processor.release(id);
        }
    }

    /// Every thread name across all pools.
    pub fn thread_names(&self) -> Vec<String> {
        self.groups().flat_map(|g| g.thread_names()).collect()
    }

    fn groups(&self) -> impl Iterator<Item = &EventLoopGroup> {
        [&self.acceptor, &self.client_worker]
            .into_iter()
            .chain(self.client_processor.as_ref())
            .chain(std::iter::once(&self.server_worker))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop acceptors first, then readers and processors, then upstream workers. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down thread pools");
        for group in self.groups() {
            group.shutdown();
        }
        info!("Thread pools shutdown complete");
    }
}

impl Drop for ProxyThreadPools {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ProxyThreadPools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyThreadPools")
            .field("acceptor", &self.acceptor)
            .field("client_worker", &self.client_worker)
            .field("client_processor", &self.client_processor)
            .field("server_worker", &self.server_worker)
            .finish()
    }
}
