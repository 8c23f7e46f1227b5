//! Request and response hooks run by the processing stage.

use bytes::Bytes;
use hyper::{Request, Response};

use crate::connection::Connection;

/// Outcome of the client request hook.
#[derive(Debug)]
pub enum FilterAction {
    /// Forward the (possibly modified) request upstream.
    Continue,
    /// Answer the client directly without contacting the upstream.
    Respond(Response<Bytes>),
}

/// Business logic hooks, supplied by the embedding application.
///
/// Both hooks run on the processing thread: the connection's pinned
/// client-processor when separate processing is enabled, its client-to-proxy
/// worker otherwise. They may block; a blocked hook stalls only the
/// connections pinned to that thread. A panic is caught and answered with 500.
pub trait HttpFilters: Send + Sync + 'static {
    fn client_to_proxy_request(
        &self,
        _conn: &Connection,
        _request: &mut Request<Bytes>,
    ) -> FilterAction {
        FilterAction::Continue
    }

    fn proxy_to_client_response(&self, _conn: &Connection, _response: &mut Response<Bytes>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFilters;

impl HttpFilters for NoopFilters {}
