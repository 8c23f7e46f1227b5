//! Response body that reports request completion to the tracer.

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::connection::Connection;
use crate::trace::{RequestTracer, ResponseHead};

/// A fully buffered response body.
///
/// Dropping it means hyper is done with the response, either written or
/// abandoned, so `finish` is called from `Drop`. That makes it exactly once
/// per response.
pub struct TracedBody {
    data: Option<Bytes>,
    finish: Option<FinishOnDrop>,
}

struct FinishOnDrop {
    tracer: Arc<dyn RequestTracer>,
    conn: Arc<Connection>,
    head: ResponseHead,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.tracer.finish(&self.conn, &self.head);
    }
}

impl TracedBody {
    pub fn new(
        data: Bytes,
        tracer: Arc<dyn RequestTracer>,
        conn: Arc<Connection>,
        head: ResponseHead,
    ) -> Self {
        Self {
            data: Some(data),
            finish: Some(FinishOnDrop { tracer, conn, head }),
        }
    }

    /// A body with no completion hook, for responses sent before tracing started.
    pub fn untraced(data: Bytes) -> Self {
        Self {
            data: Some(data),
            finish: None,
        }
    }
}

impl Body for TracedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let data = self.get_mut().data.take().filter(|d| !d.is_empty());
        Poll::Ready(data.map(|d| Ok(Frame::data(d))))
    }

    fn is_end_stream(&self) -> bool {
        self.data.as_ref().map_or(true, Bytes::is_empty)
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.data.as_ref().map_or(0, |d| d.len() as u64))
    }
}

impl std::fmt::Debug for TracedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedBody")
            .field("remaining", &self.data.as_ref().map_or(0, Bytes::len))
            .field("traced", &self.finish.is_some())
            .finish()
    }
}
