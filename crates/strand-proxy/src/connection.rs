//! Client-to-proxy connection state shared across pipeline stages.
//!
//! A [`Connection`] is created by an acceptor thread, pinned to one client-read
//! worker for its whole life, and handed by `Arc` to every stage that needs its
//! trace slot or transparency flag, whichever thread that stage runs on.

use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    read_worker: usize,
    /// Written by the tracer once per request, read by every stage.
    trace: RwLock<Option<Arc<str>>>,
    transparent: AtomicBool,
    closed: AtomicBool,
    requests: AtomicU64,
}

impl Connection {
    pub fn new(peer_addr: SocketAddr, read_worker: usize, transparent: bool) -> Self {
        Self {
            id: ConnectionId::next(),
            peer_addr,
            read_worker,
            trace: RwLock::new(None),
            transparent: AtomicBool::new(transparent),
            closed: AtomicBool::new(false),
            requests: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Index of the client-read worker this connection is pinned to.
    pub fn read_worker(&self) -> usize {
        self.read_worker
    }

    /// Replace the current trace. Last write wins.
    pub fn set_trace(&self, trace: impl Into<Arc<str>>) {
        *self.trace.write() = Some(trace.into());
    }

    pub fn trace(&self) -> Option<Arc<str>> {
        self.trace.read().clone()
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent.load(Ordering::Acquire)
    }

    pub fn set_transparent(&self, transparent: bool) {
        self.transparent.store(transparent, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true for the call that actually closed the connection.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Count a decoded request and return its 1-based sequence on this connection.
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}
