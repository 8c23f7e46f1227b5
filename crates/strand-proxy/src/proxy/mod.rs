//! Proxy server module.
//!
//! This module provides the forward proxy built on the worker pools:
//! - Accepting connections and pinning each to a client-to-proxy worker
//! - Reading and tracing requests, then handing them to processing
//! - Encoding outbound requests, including transparent-mode header scrubbing
//! - Exchanging requests with origin servers on proxy-to-server workers
//!
//! # Module Structure
//!
//! - `server` - ProxyServer, the accept loop, and the per-connection read path
//! - `encoder` - Outbound request encoding and trace header scrubbing
//! - `forwarding` - Upstream exchange and error responses
//! - `headers` - Static header names
//! - `network` - Listener creation

mod encoder;
mod forwarding;
pub mod headers;
mod network;
mod server;


pub use encoder::{encode_request, scrub_trace_headers, OutboundRequest};
pub use forwarding::{error_response, upstream_error_response, UpstreamClient};
pub use server::{ProxyServer, RunningProxy};
