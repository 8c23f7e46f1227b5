//! Per-request stages between the client socket and the upstream exchange.
//!
//! A request moves through, in order:
//!
//! 1. tracer `start` on the client-to-proxy worker that decoded it
//! 2. `read_logging` - `Read message` / `Read Complete` log lines
//! 3. `handoff` - inline, or onto the connection's pinned processing worker
//! 4. `processing` - filters, outbound encoding, upstream exchange on a
//!    proxy-to-server worker
//! 5. `body` - the response body calls tracer `finish` once hyper drops it

mod body;
mod filters;
mod handoff;
mod processing;
mod read_logging;

pub use body::TracedBody;
pub use filters::{FilterAction, HttpFilters, NoopFilters};
pub use handoff::{Dispatcher, Handoff};
pub use processing::RequestProcessor;
pub use read_logging::ReadLoggingStage;
