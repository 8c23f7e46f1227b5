//! Header names the proxy reads, strips, or rewrites.

use hyper::header::{HeaderMap, HeaderName};

// Trace propagation headers
pub static TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");
pub static X_B3_TRACEID: HeaderName = HeaderName::from_static("x-b3-traceid");
pub static X_B3_SPANID: HeaderName = HeaderName::from_static("x-b3-spanid");
pub static X_B3_SAMPLED: HeaderName = HeaderName::from_static("x-b3-sampled");
pub static X_B3_PARENTSPANID: HeaderName = HeaderName::from_static("x-b3-parentspanid");
pub static X_VGS_REQUEST_ID: HeaderName = HeaderName::from_static("x-vgs-request-id");

// Hop-by-hop headers
pub static CONNECTION: HeaderName = HeaderName::from_static("connection");
pub static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
pub static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
pub static PROXY_AUTHORIZATION: HeaderName = HeaderName::from_static("proxy-authorization");
pub static TE: HeaderName = HeaderName::from_static("te");
pub static TRAILER: HeaderName = HeaderName::from_static("trailer");
pub static TRANSFER_ENCODING: HeaderName = HeaderName::from_static("transfer-encoding");
pub static UPGRADE: HeaderName = HeaderName::from_static("upgrade");

/// Removed from outbound requests on transparent connections. Exactly these.
pub fn trace_headers() -> [&'static HeaderName; 6] {
    [
        &TRACEPARENT,
        &X_B3_TRACEID,
        &X_B3_SPANID,
        &X_B3_SAMPLED,
        &X_B3_PARENTSPANID,
        &X_VGS_REQUEST_ID,
    ]
}

/// Connection-scoped headers never forwarded to the next hop.
pub fn hop_by_hop_headers() -> [&'static HeaderName; 8] {
    [
        &CONNECTION,
        &PROXY_CONNECTION,
        &KEEP_ALIVE,
        &PROXY_AUTHORIZATION,
        &TE,
        &TRAILER,
        &TRANSFER_ENCODING,
        &UPGRADE,
    ]
}

/// Bulk header removal.
pub trait HeaderMapExt {
    /// Remove every value of every listed header. Returns how many names were present.
    fn remove_all(&mut self, names: &[&HeaderName]) -> usize;
}

impl HeaderMapExt for HeaderMap {
    fn remove_all(&mut self, names: &[&HeaderName]) -> usize {
        names
            .iter()
            .filter(|name| self.remove(**name).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_static_header_names() {
        assert_eq!(TRACEPARENT.as_str(), "traceparent");
        assert_eq!(X_B3_PARENTSPANID.as_str(), "x-b3-parentspanid");
        assert_eq!(X_VGS_REQUEST_ID.as_str(), "x-vgs-request-id");
    }

    #[test]
    fn test_trace_header_set() {
        let names: Vec<&str> = trace_headers().iter().map(|n| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "traceparent",
                "x-b3-traceid",
                "x-b3-spanid",
                "x-b3-sampled",
                "x-b3-parentspanid",
                "x-vgs-request-id"
            ]
        );
    }

    #[test]
    fn test_remove_all_counts_present_names() {
        let mut headers = HeaderMap::new();
        headers.insert(&X_B3_TRACEID, HeaderValue::from_static("a"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        assert_eq!(headers.remove_all(&trace_headers()), 1);
        assert!(headers.get(&X_B3_TRACEID).is_none());
        assert!(headers.get("accept").is_some());
    }

    #[test]
    fn test_hop_by_hop_set_excludes_trace_headers() {
        for name in trace_headers() {
            assert!(!hop_by_hop_headers().contains(&name));
        }
    }

    #[test]
    fn test_remove_all_drops_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append(&TRACEPARENT, HeaderValue::from_static("one"));
        headers.append(&TRACEPARENT, HeaderValue::from_static("two"));

        assert_eq!(headers.remove_all(&[&TRACEPARENT]), 1);
        assert!(!headers.contains_key(&TRACEPARENT));
    }
}
