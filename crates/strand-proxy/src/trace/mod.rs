//! Per-request trace attribution.
//!
//! A [`RequestTracer`] derives a trace id when a request is first decoded and
//! stores it in the connection's trace slot. Every later stage reads the slot,
//! whichever thread it runs on.

mod header_tracer;

use bytes::Bytes;
use hyper::{HeaderMap, Request, StatusCode};
use std::sync::Arc;

use crate::connection::Connection;

pub use header_tracer::HeaderTracer;

/// Status and headers of a response on its way back to the client.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }
}

/// Hooks called around every proxied request.
///
/// `start` runs exactly once per decoded request on the client-read worker,
/// before the request becomes visible to any other stage. `finish` runs once
/// the response has been handed to the client transport, and must also cope
/// with a connection that was never started.
pub trait RequestTracer: Send + Sync {
    fn start(&self, conn: &Connection, request: &Request<Bytes>);

    fn finish(&self, conn: &Connection, response: &ResponseHead);

    /// Trace id of the request currently in flight on `conn`.
    fn current_trace(&self, conn: &Connection) -> Option<Arc<str>> {
        conn.trace()
    }
}

/// Tracer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl RequestTracer for NoopTracer {
    fn start(&self, _conn: &Connection, _request: &Request<Bytes>) {}

    fn finish(&self, _conn: &Connection, _response: &ResponseHead) {}
}
