//! Shared fixtures for proxy integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use strand_proxy::{
    Config, Connection, FilterAction, HttpFilters, RequestTracer, ResponseHead, RunningProxy,
    ThreadPoolConfig,
};
use tokio::net::TcpListener;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// One log event: the emitting thread and the rendered message.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub thread: String,
    pub message: String,
}

/// Process-wide log capture. Tests tell their records apart by thread group name.
#[derive(Clone, Default)]
pub struct LogCollector {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogCollector {
    /// Install the collector as the global subscriber, once per test binary.
    pub fn global() -> &'static LogCollector {
        static COLLECTOR: OnceLock<LogCollector> = OnceLock::new();
        COLLECTOR.get_or_init(|| {
            let collector = LogCollector::default();
            let subscriber = tracing_subscriber::registry().with(collector.clone());
            tracing::subscriber::set_global_default(subscriber)
                .expect("global subscriber already set");
            collector
        })
    }

    /// Records emitted on threads of thread group `group`.
    pub fn records_for(&self, group: &str) -> Vec<LogRecord> {
        let prefix = format!("{group}-");
        self.records
            .lock()
            .iter()
            .filter(|r| r.thread.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Messages from `group` threads containing `needle`.
    pub fn messages_containing(&self, group: &str, needle: &str) -> Vec<LogRecord> {
        self.records_for(group)
            .into_iter()
            .filter(|r| r.message.contains(needle))
            .collect()
    }

    /// Distinct names of `group` threads that logged anything.
    pub fn thread_names(&self, group: &str) -> HashSet<String> {
        self.records_for(group).into_iter().map(|r| r.thread).collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let thread = current_thread_name();
        self.records.lock().push(LogRecord {
            thread,
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or_default()
        .to_string()
}

/// Uses the last path segment of each request as its trace id.
#[derive(Default)]
pub struct KeyTracer {
    /// Keys traced on client-to-proxy worker threads, with that thread's name
    pub read_traces: Mutex<HashMap<String, String>>,
    pub finished: AtomicUsize,
}

impl KeyTracer {
    pub fn read_count(&self) -> usize {
        self.read_traces.lock().len()
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl RequestTracer for KeyTracer {
    fn start(&self, conn: &Connection, request: &Request<Bytes>) {
        let key = path_key(request.uri().path());
        conn.set_trace(key.clone());
        let thread = current_thread_name();
        if thread.contains("-client-worker-") {
            self.read_traces.lock().insert(key, thread);
        }
    }

    fn finish(&self, _conn: &Connection, _response: &ResponseHead) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records what the processing stage observed, optionally blocking on a gate.
#[derive(Default)]
pub struct RecordingFilters {
    /// Trace seen by the request hook, with the processing thread's name
    pub processing_traces: Mutex<HashMap<String, String>>,
    /// Traces in the order the request hook saw them
    pub processing_order: Mutex<Vec<String>>,
    /// `key` header of every upstream response
    pub response_keys: Mutex<HashSet<String>>,
    /// Requests whose trace did not match their own path
    pub mismatches: AtomicUsize,
    /// Request hook blocks until this yields or disconnects
    pub gate: Option<crossbeam::channel::Receiver<()>>,
}

impl RecordingFilters {
    pub fn gated(gate: crossbeam::channel::Receiver<()>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn processed_count(&self) -> usize {
        self.processing_traces.lock().len()
    }

    pub fn processing_threads(&self) -> HashSet<String> {
        self.processing_traces.lock().values().cloned().collect()
    }
}

impl HttpFilters for RecordingFilters {
    fn client_to_proxy_request(
        &self,
        conn: &Connection,
        request: &mut Request<Bytes>,
    ) -> FilterAction {
        let key = path_key(request.uri().path());
        let trace = conn.trace().map(|t| t.to_string()).unwrap_or_default();
        if trace != key {
            self.mismatches.fetch_add(1, Ordering::SeqCst);
        }
        tracing::info!("Client to proxy request. trace id {}", trace);
        self.processing_order.lock().push(trace.clone());
        self.processing_traces
            .lock()
            .insert(trace, current_thread_name());

        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        FilterAction::Continue
    }

    fn proxy_to_client_response(&self, _conn: &Connection, response: &mut Response<Bytes>) {
        if let Some(key) = response.headers().get("key").and_then(|v| v.to_str().ok()) {
            self.response_keys.lock().insert(key.to_string());
        }
    }
}

/// Last `/`-separated segment of a path or URI.
pub fn path_key(uri: &str) -> String {
    uri.rsplit('/').next().unwrap_or_default().to_string()
}

/// Trace propagation headers, as a client would send them.
pub const TRACE_HEADERS: [(&str, &str); 6] = [
    (
        "traceparent",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
    ),
    ("x-b3-traceid", "80f198ee56343ba864fe8b2a57d3eff7"),
    ("x-b3-spanid", "e457b5a2e4d86bd1"),
    ("x-b3-sampled", "1"),
    ("x-b3-parentspanid", "05e3ac9a4f6e3b90"),
    ("x-vgs-request-id", "req-123"),
];

/// Origin server answering every request with 200. Echoes the last path
/// segment in a `key` header and the number of trace headers it received in
/// `x-trace-headers`.
pub async fn start_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                    let key = path_key(req.uri().path());
                    let trace_headers = TRACE_HEADERS
                        .iter()
                        .filter(|(name, _)| req.headers().contains_key(*name))
                        .count();
                    // Drain the request body before answering
                    let _ = req.into_body().collect().await;
                    let response = Response::builder()
                        .status(200)
                        .header("key", key)
                        .header("x-trace-headers", trace_headers.to_string())
                        .header("content-type", "application/json")
                        .body(Full::new(Bytes::from_static(br#"{"status":"OK"}"#)))
                        .unwrap();
                    Ok::<_, Infallible>(response)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Proxy config listening on an ephemeral port with thread group `group`.
pub fn proxy_config(group: &str, pools: ThreadPoolConfig) -> Config {
    let mut config = Config::default();
    config.listen.address = "127.0.0.1:0".to_string();
    config.thread_pools = pools.with_group_name(group).with_drain_timeout_ms(500);
    config
}

/// Client sending every request through `proxy` on a fresh connection.
pub fn proxied_client(proxy: &RunningProxy) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", proxy.local_addr())).unwrap())
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Stop the proxy off the async runtime; stopping joins pool threads.
pub async fn stop(proxy: RunningProxy) {
    tokio::task::spawn_blocking(move || drop(proxy))
        .await
        .unwrap();
}
