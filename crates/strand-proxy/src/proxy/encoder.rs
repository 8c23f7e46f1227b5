//! Outbound request encoding.
//!
//! Turns a request as received from the client (absolute-form URI, client
//! connection headers) into what is sent to the origin server. On transparent
//! connections the proxy's own trace propagation headers are stripped here.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Uri};
use hyper::Request;
use tracing::debug;

use super::headers::{hop_by_hop_headers, trace_headers, HeaderMapExt, CONNECTION};
use crate::connection::Connection;
use crate::error::UpstreamError;
use crate::metrics::SCRUBBED_HEADERS;

const DEFAULT_HTTP_PORT: u16 = 80;

/// A request ready to be written to an upstream connection.
#[derive(Debug)]
pub struct OutboundRequest {
    /// `host:port` to connect to.
    pub address: String,
    pub request: Request<Full<Bytes>>,
}

/// Strip trace propagation headers when `conn` is transparent.
///
/// Returns the number of header names removed. Never touches the connection's
/// trace slot.
pub fn scrub_trace_headers(conn: &Connection, headers: &mut HeaderMap) -> usize {
    if !conn.is_transparent() {
        return 0;
    }
    let removed = headers.remove_all(&trace_headers());
    if removed > 0 {
        SCRUBBED_HEADERS.inc_by(removed as u64);
        debug!(connection = %conn.id(), removed, "Scrubbed trace headers");
    }
    removed
}

/// Encode `request` for the origin server. The scrubber runs exactly once per call.
pub fn encode_request(
    conn: &Connection,
    request: Request<Bytes>,
) -> Result<OutboundRequest, UpstreamError> {
    let (mut parts, body) = request.into_parts();

    if let Some(scheme) = parts.uri.scheme_str() {
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(UpstreamError::UnsupportedScheme(scheme.to_string()));
        }
    }

    let authority = target_authority(&parts.uri, &parts.headers)?;
    let address = format!(
        "{}:{}",
        authority.host(),
        authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT)
    );

    let path = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    parts.uri = Uri::from(path);

    strip_hop_by_hop(&mut parts.headers);
    // Recomputed from the buffered body
    parts.headers.remove(CONTENT_LENGTH);

    if !parts.headers.contains_key(HOST) {
        if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
            parts.headers.insert(HOST, value);
        }
    }

    scrub_trace_headers(conn, &mut parts.headers);

    Ok(OutboundRequest {
        address,
        request: Request::from_parts(parts, Full::new(body)),
    })
}

fn target_authority(uri: &Uri, headers: &HeaderMap) -> Result<Authority, UpstreamError> {
    if let Some(authority) = uri.authority() {
        return Ok(authority.clone());
    }
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Authority>().ok())
        .ok_or(UpstreamError::MissingHost)
}

/// Remove hop-by-hop headers, including any the client named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(&CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();
    for name in named {
        headers.remove(name.as_str());
    }
    headers.remove_all(&hop_by_hop_headers());
}
