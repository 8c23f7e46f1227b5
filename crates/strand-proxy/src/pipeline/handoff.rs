//! Hand-off from the read stage to the processing stage.

use bytes::Bytes;
use futures::future::BoxFuture;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::processing::RequestProcessor;
use crate::connection::Connection;
use crate::error::PoolError;
use crate::metrics::{record_handoff, record_processing_failure};
use crate::pool::ProxyThreadPools;
use crate::proxy::error_response;

/// Routes decoded requests to where they are processed.
///
/// With a processing pool, every request of a connection goes to the worker
/// pinned to that connection; that worker's FIFO event loop preserves read
/// order. Without one, processing runs inline on the read thread.
#[derive(Clone)]
pub struct Dispatcher {
    processor: Arc<RequestProcessor>,
    pools: Arc<ProxyThreadPools>,
}

/// A request that has left the read stage.
pub enum Handoff {
    Inline(BoxFuture<'static, Response<Bytes>>),
    Separate(oneshot::Receiver<Response<Bytes>>),
}

impl Dispatcher {
    pub fn new(processor: Arc<RequestProcessor>, pools: Arc<ProxyThreadPools>) -> Self {
        Self { processor, pools }
    }

    /// Enqueue `request` for processing without waiting for it.
    ///
    /// The caller must have run `start` on the tracer already; the enqueue is
    /// what publishes the trace to the processing thread.
    pub fn dispatch(
        &self,
        conn: &Arc<Connection>,
        request: Request<Bytes>,
    ) -> Result<Handoff, PoolError> {
        let processor = Arc::clone(&self.processor);
        let conn = Arc::clone(conn);

        let Some(pool) = self.pools.client_to_proxy_processing_pool() else {
            record_handoff(false);
            return Ok(Handoff::Inline(Box::pin(async move {
                processor.process(&conn, request).await
            })));
        };

        let (tx, rx) = oneshot::channel();
        let worker = pool.pinned(conn.id());
        debug!(connection = %conn.id(), worker = worker.name(), "Handing off to processing worker");
        worker.submit(async move {
            if conn.is_closed() {
                debug!(connection = %conn.id(), "Connection closed before processing, skipping");
                return;
            }
            let response = processor.process(&conn, request).await;
            let _ = tx.send(response);
        })?;
        record_handoff(true);
        Ok(Handoff::Separate(rx))
    }

    pub fn is_separate_processing(&self) -> bool {
        self.pools.is_separate_processing()
    }
}

impl Handoff {
    /// Wait for the processed response.
    pub async fn response(self) -> Response<Bytes> {
        match self {
            Handoff::Inline(fut) => fut.await,
            Handoff::Separate(rx) => match rx.await {
                Ok(response) => response,
                Err(_) => {
                    error!("Processing worker dropped the request");
                    record_processing_failure("handoff");
                    error_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
                }
            },
        }
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handoff::Inline(_) => f.write_str("Handoff::Inline"),
            Handoff::Separate(_) => f.write_str("Handoff::Separate"),
        }
    }
}
