//! Worker threads
//!
//! Each worker owns one blocking resource (a listening endpoint, a live
//! session or a pending dial) on a dedicated thread. Cancelling a worker
//! closes its resource, which makes the blocked call return.

mod dial;
mod listener;
mod session;

pub use dial::DialWorker;
pub use listener::ListenerWorker;
pub use session::SessionWorker;

use tracing::warn;

use crate::metrics::METRICS;
use crate::transport::StreamSession;

/// Close a session, logging instead of propagating failures
pub(crate) fn close_session(session: &StreamSession) {
    if let Err(e) = session.close() {
        METRICS.close_error();
        warn!(peer = session.peer(), error = %e, "close() of session failed");
    }
}
