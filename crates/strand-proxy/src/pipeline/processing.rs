//! The processing stage: filters, encoding, and the upstream exchange.

use bytes::Bytes;
use hyper::{Request, Response, StatusCode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::filters::{FilterAction, HttpFilters};
use crate::connection::Connection;
use crate::metrics::record_processing_failure;
use crate::pool::ProxyThreadPools;
use crate::proxy::{encode_request, error_response, upstream_error_response, UpstreamClient};

/// Runs one request from filter to upstream response.
///
/// Called on the processing thread. The upstream exchange itself is moved to a
/// proxy-to-server worker; the processing thread only waits for its result.
pub struct RequestProcessor {
    filters: Arc<dyn HttpFilters>,
    upstream: UpstreamClient,
    pools: Arc<ProxyThreadPools>,
}

impl RequestProcessor {
    pub fn new(
        filters: Arc<dyn HttpFilters>,
        upstream: UpstreamClient,
        pools: Arc<ProxyThreadPools>,
    ) -> Self {
        Self {
            filters,
            upstream,
            pools,
        }
    }

    pub async fn process(&self, conn: &Connection, mut request: Request<Bytes>) -> Response<Bytes> {
        debug!(
            connection = %conn.id(),
            "Processing message. trace id {}",
            conn.trace().as_deref().unwrap_or_default()
        );

        let action = catch_unwind(AssertUnwindSafe(|| {
            self.filters.client_to_proxy_request(conn, &mut request)
        }));
        let mut response = match action {
            Ok(FilterAction::Continue) => self.forward(conn, request).await,
            Ok(FilterAction::Respond(response)) => response,
            Err(_) => {
                error!(connection = %conn.id(), "Request filter panicked");
                record_processing_failure("request_filter");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        };

        let filtered = catch_unwind(AssertUnwindSafe(|| {
            self.filters.proxy_to_client_response(conn, &mut response)
        }));
        if filtered.is_err() {
            error!(connection = %conn.id(), "Response filter panicked");
            record_processing_failure("response_filter");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
        response
    }

    async fn forward(&self, conn: &Connection, request: Request<Bytes>) -> Response<Bytes> {
        let outbound = match encode_request(conn, request) {
            Ok(outbound) => outbound,
            Err(err) => {
                record_processing_failure("upstream");
                return upstream_error_response(&err);
            }
        };

        let (tx, rx) = oneshot::channel();
        let upstream = self.upstream.clone();
        let submitted = self
            .pools
            .proxy_to_server_worker_pool()
            .next()
            .submit(async move {
                let _ = tx.send(upstream.send(outbound).await);
            });
        if let Err(err) = submitted {
            error!("Failed to hand request to upstream worker: {}", err);
            record_processing_failure("handoff");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
        }

        match rx.await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                record_processing_failure("upstream");
                upstream_error_response(&err)
            }
            Err(_) => {
                record_processing_failure("handoff");
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
        }
    }
}
