//! ProxyServer and the accept and read paths.
//!
//! Acceptor threads accept sockets and move each one to a client-to-proxy
//! worker, which serves the connection with hyper for its whole life. Every
//! decoded request is traced and logged there, then handed to processing.

use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_LENGTH;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::forwarding::{error_response, UpstreamClient};
use super::network::create_listener;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::ProxyError;
use crate::metrics::{
    record_processing_failure, record_request, ACTIVE_CONNECTIONS, CONNECTIONS_ACCEPTED_TOTAL,
};
use crate::pipeline::{
    Dispatcher, HttpFilters, NoopFilters, ReadLoggingStage, RequestProcessor, TracedBody,
};
use crate::pool::ProxyThreadPools;
use crate::trace::{NoopTracer, RequestTracer, ResponseHead};

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The proxy server, before it is started.
pub struct ProxyServer {
    config: Config,
    tracer: Arc<dyn RequestTracer>,
    filters: Arc<dyn HttpFilters>,
}

impl ProxyServer {
    /// Create a server with no tracing and no filters.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tracer: Arc::new(NoopTracer),
            filters: Arc::new(NoopFilters),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn RequestTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_filters(mut self, filters: Arc<dyn HttpFilters>) -> Self {
        self.filters = filters;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the thread pools, bind the listener, and start accepting.
    ///
    /// Returns once every acceptor is running. Nothing is left running on error.
    pub fn start(self) -> Result<RunningProxy, ProxyError> {
        self.config.validate()?;
        let addr = self.config.listen.socket_addr()?;

        let pools = Arc::new(ProxyThreadPools::new(&self.config.thread_pools)?);
        let listener = create_listener(addr, self.config.listen.backlog)
            .map_err(|source| ProxyError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ProxyError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let processor = Arc::new(RequestProcessor::new(
            Arc::clone(&self.filters),
            UpstreamClient::new(self.config.upstream.connect_timeout()),
            Arc::clone(&pools),
        ));
        let shared = Arc::new(Shared {
            tracer: Arc::clone(&self.tracer),
            read_logging: ReadLoggingStage::new(Arc::clone(&self.tracer)),
            dispatcher: Dispatcher::new(processor, Arc::clone(&pools)),
            pools: Arc::clone(&pools),
            transparent: self.config.upstream.transparent,
            shutdown: shutdown_rx,
        });

        let running = RunningProxy {
            local_addr,
            pools,
            shutdown_tx,
            stopped: AtomicBool::new(false),
        };

        for acceptor in running.pools.acceptor_pool().iter() {
            let listener = listener
                .try_clone()
                .map_err(|source| ProxyError::Bind { addr, source })?;
            acceptor.submit(accept_loop(listener, Arc::clone(&shared)))?;
        }

        info!("Listening on http://{}", local_addr);
        info!(
            "Separate processing event loop: {}",
            running.pools.is_separate_processing()
        );
        Ok(running)
    }
}

/// State shared by every connection of one running server.
struct Shared {
    tracer: Arc<dyn RequestTracer>,
    read_logging: ReadLoggingStage,
    dispatcher: Dispatcher,
    pools: Arc<ProxyThreadPools>,
    transparent: bool,
    shutdown: watch::Receiver<bool>,
}

async fn accept_loop(listener: std::net::TcpListener, shared: Arc<Shared>) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to register listener: {}", err);
            return;
        }
    };
    let mut shutdown = shared.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => shared.accept(stream, peer),
                Err(err) => {
                    warn!("Failed to accept connection: {}", err);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }
    debug!("Acceptor stopped");
}

impl Shared {
    /// Pin a new connection to a client-to-proxy worker and move the socket there.
    fn accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        CONNECTIONS_ACCEPTED_TOTAL.inc();

        let worker = self.pools.client_to_proxy_worker_pool().next();
        let conn = Arc::new(Connection::new(peer, worker.index(), self.transparent));

        // A tokio socket belongs to the runtime that registered it
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to detach connection from {}: {}", peer, err);
                return;
            }
        };

        if let Err(err) = worker.submit(serve_connection(Arc::clone(self), conn, stream)) {
            warn!("Dropping connection from {}: {}", peer, err);
        }
    }

    async fn handle_request(
        &self,
        conn: Arc<Connection>,
        req: Request<Incoming>,
    ) -> Result<Response<TracedBody>, Infallible> {
        if req.method() == Method::CONNECT {
            debug!(connection = %conn.id(), "Rejecting CONNECT request");
            return Ok(untraced(error_response(
                StatusCode::NOT_IMPLEMENTED,
                "CONNECT is not supported",
            )));
        }

        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(connection = %conn.id(), "Failed to read request body: {}", err);
                return Ok(untraced(error_response(
                    StatusCode::BAD_REQUEST,
                    "Failed to read request body",
                )));
            }
        };
        let request = Request::from_parts(parts, body);
        let method = request.method().clone();

        conn.record_request();
        self.tracer.start(&conn, &request);
        self.read_logging.read_message(&conn);

        let handoff = self.dispatcher.dispatch(&conn, request);
        self.read_logging.read_complete(&conn);

        let response = match handoff {
            Ok(handoff) => handoff.response().await,
            Err(err) => {
                error!(connection = %conn.id(), "Failed to hand off request: {}", err);
                record_processing_failure("handoff");
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
        };
        record_request(method.as_str(), response.status().as_u16());

        let (mut parts, body) = response.into_parts();
        // Filters may have changed the body; hyper sets it from the body length
        parts.headers.remove(CONTENT_LENGTH);
        let head = ResponseHead::new(parts.status, parts.headers.clone());
        let body = TracedBody::new(body, Arc::clone(&self.tracer), conn, head);
        Ok(Response::from_parts(parts, body))
    }
}

fn untraced(response: Response<Bytes>) -> Response<TracedBody> {
    response.map(TracedBody::untraced)
}

/// Serve one client connection on its client-to-proxy worker until it closes.
async fn serve_connection(shared: Arc<Shared>, conn: Arc<Connection>, stream: std::net::TcpStream) {
    let stream = match TcpStream::from_std(stream) {
        Ok(stream) => stream,
        Err(err) => {
            error!(connection = %conn.id(), "Failed to register connection: {}", err);
            return;
        }
    };
    let _ = stream.set_nodelay(true);

    ACTIVE_CONNECTIONS.inc();
    shared.read_logging.connected(&conn);

    let service = {
        let shared = Arc::clone(&shared);
        let conn = Arc::clone(&conn);
        service_fn(move |req| {
            let shared = Arc::clone(&shared);
            let conn = Arc::clone(&conn);
            async move { shared.handle_request(conn, req).await }
        })
    };

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut shutdown = shared.shutdown.clone();
    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.changed() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    if let Err(err) = result {
        debug!(connection = %conn.id(), "Error serving connection from {}: {}", conn.peer_addr(), err);
    }

    conn.mark_closed();
    shared.pools.release_connection(conn.id());
    ACTIVE_CONNECTIONS.dec();
    shared.read_logging.closed(&conn);
}

/// Handle to a started proxy. Dropping it stops the proxy.
pub struct RunningProxy {
    local_addr: SocketAddr,
    pools: Arc<ProxyThreadPools>,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl RunningProxy {
    /// The bound address; differs from the configured one when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pools(&self) -> &ProxyThreadPools {
        &self.pools
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting, close connections gracefully, and join every pool. Idempotent.
    ///
    /// Blocks until the pools have drained; call it from outside the pools' threads.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping proxy on {}", self.local_addr);
        let _ = self.shutdown_tx.send(true);
        self.pools.shutdown();
        info!("Proxy stopped");
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RunningProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProxy")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
