//! Request exchange with origin servers.
//!
//! Each exchange opens its own HTTP/1.1 connection on the proxy-to-server
//! worker it was submitted to; nothing is pooled across workers.

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, error};

use super::encoder::OutboundRequest;
use super::headers::{hop_by_hop_headers, HeaderMapExt};
use crate::error::UpstreamError;
use crate::metrics::record_upstream_duration;

/// Helper function to create an error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<Bytes> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Sends encoded requests to their origin server.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    connect_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect, send one request, and buffer the response.
    pub async fn send(&self, outbound: OutboundRequest) -> Result<Response<Bytes>, UpstreamError> {
        let started = Instant::now();
        let OutboundRequest { address, request } = outbound;

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(UpstreamError::Connect {
                    authority: address,
                    source,
                })
            }
            Err(_) => {
                return Err(UpstreamError::ConnectTimeout {
                    authority: address,
                    timeout: self.connect_timeout,
                })
            }
        };
        let _ = stream.set_nodelay(true);

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        let conn_address = address.clone();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("Upstream connection to {} ended: {}", conn_address, err);
            }
        });

        let response = sender.send_request(request).await?;
        let (mut parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        parts.headers.remove_all(&hop_by_hop_headers());

        let elapsed = started.elapsed();
        record_upstream_duration(parts.status.as_u16(), elapsed.as_secs_f64() * 1000.0);
        debug!(
            upstream = %address,
            status = parts.status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Upstream exchange complete"
        );

        Ok(Response::from_parts(parts, body))
    }
}

/// Map an upstream failure to the response sent back to the client.
pub fn upstream_error_response(err: &UpstreamError) -> Response<Bytes> {
    error!("Failed to forward request to upstream: {}", err);
    match err {
        UpstreamError::MissingHost => {
            error_response(StatusCode::BAD_REQUEST, "Bad Request")
        }
        UpstreamError::UnsupportedScheme(_) => {
            error_response(StatusCode::NOT_IMPLEMENTED, "Unsupported scheme")
        }
        UpstreamError::ConnectTimeout { .. }
        | UpstreamError::Connect { .. }
        | UpstreamError::Http(_) => {
            error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}
