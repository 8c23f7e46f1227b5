//! Observability tap on the client read path.

use std::sync::Arc;
use tracing::info;

use crate::connection::Connection;
use crate::trace::RequestTracer;

/// Logs connection lifecycle and read events, tagged with the current trace id.
///
/// Runs on the connection's client-to-proxy worker, so per-connection log
/// order matches read order. Never touches the message.
#[derive(Clone)]
pub struct ReadLoggingStage {
    tracer: Arc<dyn RequestTracer>,
}

impl ReadLoggingStage {
    pub fn new(tracer: Arc<dyn RequestTracer>) -> Self {
        Self { tracer }
    }

    pub fn connected(&self, conn: &Connection) {
        info!(connection = %conn.id(), peer = %conn.peer_addr(), "Connected");
    }

    pub fn read_message(&self, conn: &Connection) {
        info!(connection = %conn.id(), "Read message. trace id {}", self.trace(conn));
    }

    pub fn read_complete(&self, conn: &Connection) {
        info!(connection = %conn.id(), "Read Complete. trace id {}", self.trace(conn));
    }

    pub fn closed(&self, conn: &Connection) {
        info!(
            connection = %conn.id(),
            requests = conn.request_count(),
            "Closed"
        );
    }

    fn trace(&self, conn: &Connection) -> Arc<str> {
        self.tracer
            .current_trace(conn)
            .unwrap_or_else(|| Arc::from(""))
    }
}

impl std::fmt::Debug for ReadLoggingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadLoggingStage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{HeaderTracer, NoopTracer};
    use bytes::Bytes;
    use hyper::Request;
    use tracing_test::traced_test;

    fn conn() -> Connection {
        Connection::new("127.0.0.1:5555".parse().unwrap(), 0, false)
    }

    #[test]
    #[traced_test]
    fn test_read_message_includes_trace() {
        let c = conn();
        let tracer = Arc::new(HeaderTracer);
        tracer.start(
            &c,
            &Request::builder()
                .header("x-b3-traceid", "feedface")
                .body(Bytes::new())
                .unwrap(),
        );

        let stage = ReadLoggingStage::new(tracer);
        stage.read_message(&c);
        stage.read_complete(&c);

        assert!(logs_contain("Read message. trace id feedface"));
        assert!(logs_contain("Read Complete. trace id feedface"));
        assert!(logs_contain(&c.id().to_string()));
    }

    #[test]
    #[traced_test]
    fn test_missing_trace_logs_empty_id() {
        let c = conn();
        let stage = ReadLoggingStage::new(Arc::new(NoopTracer));
        stage.read_message(&c);

        assert!(logs_contain("Read message. trace id "));
        assert!(!logs_contain("trace id None"));
    }

    #[test]
    #[traced_test]
    fn test_lifecycle_events() {
        let c = conn();
        let stage = ReadLoggingStage::new(Arc::new(NoopTracer));
        stage.connected(&c);
        c.record_request();
        stage.closed(&c);

        assert!(logs_contain("Connected"));
        assert!(logs_contain("127.0.0.1:5555"));
        assert!(logs_contain("Closed"));
        assert!(logs_contain("requests=1"));
    }

    #[test]
    fn test_stage_does_not_touch_trace() {
        let c = conn();
        c.set_trace("t-1");
        let stage = ReadLoggingStage::new(Arc::new(NoopTracer));
        stage.read_message(&c);
        stage.read_complete(&c);
        assert_eq!(c.trace().as_deref(), Some("t-1"));
    }
}
