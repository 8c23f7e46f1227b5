//! Transparent-mode header scrubbing and per-request failure isolation.

mod common;

use bytes::Bytes;
use common::{proxied_client, proxy_config, start_origin, stop, TRACE_HEADERS};
use hyper::{Request, StatusCode};
use std::sync::Arc;
use strand_proxy::{
    Connection, FilterAction, HeaderTracer, HttpFilters, ProxyServer, RunningProxy,
    ThreadPoolConfig,
};

fn start_proxy(group: &str, transparent: bool, filters: Arc<dyn HttpFilters>) -> RunningProxy {
    let mut config = proxy_config(
        group,
        ThreadPoolConfig::default().with_separate_processing_event_loop(true),
    );
    config.upstream.transparent = transparent;
    ProxyServer::new(config)
        .with_tracer(Arc::new(HeaderTracer::new()))
        .with_filters(filters)
        .start()
        .unwrap()
}

async fn trace_headers_seen_by_origin(proxy: &RunningProxy) -> String {
    let origin = start_origin().await;
    let mut request = proxied_client(proxy).get(format!("http://{origin}/scrub/check"));
    for (name, value) in TRACE_HEADERS {
        request = request.header(name, value);
    }
    let response = request.send().await.unwrap();
    assert_eq!(response.status(), 200);
    response.headers()["x-trace-headers"]
        .to_str()
        .unwrap()
        .to_string()
}

/// Records the trace each request was processed under.
#[derive(Default)]
struct TraceProbe {
    traces: parking_lot::Mutex<Vec<String>>,
}

impl HttpFilters for TraceProbe {
    fn client_to_proxy_request(
        &self,
        conn: &Connection,
        _request: &mut Request<Bytes>,
    ) -> FilterAction {
        self.traces
            .lock()
            .push(conn.trace().map(|t| t.to_string()).unwrap_or_default());
        FilterAction::Continue
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transparent_proxy_strips_trace_headers() {
    let probe = Arc::new(TraceProbe::default());
    let proxy = start_proxy("scrubon", true, probe.clone());

    assert_eq!(trace_headers_seen_by_origin(&proxy).await, "0");
    // Internal tracing still uses the propagated id
    assert_eq!(
        *probe.traces.lock(),
        vec!["4bf92f3577b34da6a3ce929d0e0e4736".to_string()]
    );

    stop(proxy).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_transparent_proxy_forwards_trace_headers() {
    let proxy = start_proxy("scruboff", false, Arc::new(TraceProbe::default()));

    assert_eq!(trace_headers_seen_by_origin(&proxy).await, "6");

    stop(proxy).await;
}

/// Flips the connection to transparent for requests under `/private/`.
struct TransparentForPrivate;

impl HttpFilters for TransparentForPrivate {
    fn client_to_proxy_request(
        &self,
        conn: &Connection,
        request: &mut Request<Bytes>,
    ) -> FilterAction {
        conn.set_transparent(request.uri().path().starts_with("/private/"));
        FilterAction::Continue
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transparency_set_at_runtime() {
    let proxy = start_proxy("scrubflip", false, Arc::new(TransparentForPrivate));
    let origin = start_origin().await;
    let client = proxied_client(&proxy);

    for (path, expected) in [("/private/a", "0"), ("/public/b", "6")] {
        let mut request = client.get(format!("http://{origin}{path}"));
        for (name, value) in TRACE_HEADERS {
            request = request.header(name, value);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.headers()["x-trace-headers"], expected, "{path}");
    }

    stop(proxy).await;
}

/// Panics on requests for `/boom`, answers `/short` itself.
struct Faulty;

impl HttpFilters for Faulty {
    fn client_to_proxy_request(
        &self,
        _conn: &Connection,
        request: &mut Request<Bytes>,
    ) -> FilterAction {
        match request.uri().path() {
            "/boom" => panic!("filter failure"),
            "/short" => FilterAction::Respond(
                hyper::Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .body(Bytes::from_static(b"blocked"))
                    .unwrap(),
            ),
            _ => FilterAction::Continue,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_filter_failure_isolated_to_its_request() {
    let proxy = start_proxy("faulty", false, Arc::new(Faulty));
    let origin = start_origin().await;
    let client = proxied_client(&proxy);

    let boom = client
        .get(format!("http://{origin}/boom"))
        .send()
        .await
        .unwrap();
    assert_eq!(boom.status(), 500);

    let short = client
        .get(format!("http://{origin}/short"))
        .send()
        .await
        .unwrap();
    assert_eq!(short.status(), 403);
    assert_eq!(short.text().await.unwrap(), "blocked");

    for i in 0..10 {
        let ok = client
            .get(format!("http://{origin}/fine/{i}"))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
    }

    stop(proxy).await;
}
