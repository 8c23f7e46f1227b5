use bytes::Bytes;
use hyper::header::HeaderMap;
use hyper::Request;
use tracing::debug;
use uuid::Uuid;

use super::{RequestTracer, ResponseHead};
use crate::connection::Connection;
use crate::proxy::headers::{TRACEPARENT, X_B3_TRACEID, X_VGS_REQUEST_ID};

/// Tracer that reuses the client's propagated trace id when there is one.
///
/// Lookup order is the W3C `traceparent` trace-id field, then `x-b3-traceid`,
/// then `x-vgs-request-id`. Requests carrying none of them get a fresh UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderTracer;

impl HeaderTracer {
    pub fn new() -> Self {
        Self
    }

    fn trace_id(headers: &HeaderMap) -> String {
        if let Some(id) = header_str(headers, &TRACEPARENT).and_then(traceparent_trace_id) {
            return id.to_string();
        }
        for name in [&X_B3_TRACEID, &X_VGS_REQUEST_ID] {
            if let Some(id) = header_str(headers, name).filter(|v| !v.is_empty()) {
                return id.to_string();
            }
        }
        Uuid::new_v4().simple().to_string()
    }
}

impl RequestTracer for HeaderTracer {
    fn start(&self, conn: &Connection, request: &Request<Bytes>) {
        conn.set_trace(Self::trace_id(request.headers()));
    }

    fn finish(&self, conn: &Connection, response: &ResponseHead) {
        debug!(
            connection = %conn.id(),
            status = response.status.as_u16(),
            "Finished request. trace id {}",
            conn.trace().as_deref().unwrap_or_default()
        );
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &hyper::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// `version-traceid-parentid-flags`; an all-zero trace id is invalid.
fn traceparent_trace_id(value: &str) -> Option<&str> {
    let mut fields = value.split('-');
    let _version = fields.next()?;
    let trace_id = fields.next()?;
    let valid = trace_id.len() == 32
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit())
        && trace_id.bytes().any(|b| b != b'0');
    valid.then_some(trace_id)
}
