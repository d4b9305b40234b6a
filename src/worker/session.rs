//! Read loop and write path over one live session

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::close_session;
use crate::connection::{ConnectionManager, Event, Generation};
use crate::metrics::METRICS;
use crate::transport::StreamSession;

/// Smallest read buffer the read loop will use
const MIN_READ_BUFFER: usize = 1;

/// Owns exactly one [`StreamSession`]
pub struct SessionWorker {
    generation: Generation,
    session: StreamSession,
    manager: Weak<ConnectionManager>,
    cancelled: AtomicBool,
    closed: AtomicBool,
    /// Serializes writers so bytes and `DataSent` events stay in order
    write_lock: Mutex<()>,
}

impl SessionWorker {
    /// Take ownership of `session` and start its read loop on a new thread.
    ///
    /// A zero `read_buffer_size` is raised to one byte. On failure the
    /// session has already been closed.
    pub(crate) fn spawn(
        generation: Generation,
        session: StreamSession,
        read_buffer_size: usize,
        manager: Weak<ConnectionManager>,
    ) -> io::Result<Arc<Self>> {
        let worker = Arc::new(Self {
            generation,
            session,
            manager,
            cancelled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        });

        // An empty buffer would read Ok(0) forever without consuming input
        let read_buffer_size = read_buffer_size.max(MIN_READ_BUFFER);

        let runner = worker.clone();
        thread::Builder::new()
            .name(format!("rose-session-{generation}"))
            .spawn(move || runner.run(read_buffer_size))
            .map_err(|e| {
                worker.cancel();
                e
            })?;

        Ok(worker)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn peer(&self) -> &str {
        self.session.peer()
    }

    /// Write `data` to the peer, returning whether it was written.
    ///
    /// A failed write is logged and counted but never treated as peer
    /// loss; only the read loop decides that.
    pub fn write(&self, data: &[u8]) -> bool {
        let _guard = self.write_lock.lock();

        if let Err(e) = self.session.write_all(data) {
            METRICS.write_failed();
            warn!(
                generation = %self.generation,
                peer = self.peer(),
                bytes = data.len(),
                error = %e,
                "Exception during write"
            );
            return false;
        }

        METRICS.bytes_tx(data.len() as u64);
        if let Some(manager) = self.manager.upgrade() {
            manager.deliver(self.generation, Event::DataSent(Bytes::copy_from_slice(data)));
        }
        true
    }

    /// Close the session. A blocked read fails and the loop exits.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(generation = %self.generation, peer = self.peer(), "Cancelling session");
        self.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        close_session(&self.session);
        METRICS.session_closed();
    }

    fn run(self: Arc<Self>, read_buffer_size: usize) {
        info!(generation = %self.generation, peer = self.peer(), "BEGIN session");
        let mut buffer = vec![0u8; read_buffer_size];

        loop {
            match self.session.read(&mut buffer) {
                Ok(n) => {
                    trace!(generation = %self.generation, bytes = n, "Chunk received");

                    let Some(manager) = self.manager.upgrade() else {
                        break;
                    };
                    let data = Bytes::copy_from_slice(&buffer[..n]);
                    if !manager.deliver(self.generation, Event::DataReceived(data)) {
                        // Superseded; cancellation is already under way
                        break;
                    }
                    METRICS.bytes_rx(n as u64);
                }
                Err(e) => {
                    if self.is_cancelled() {
                        debug!(generation = %self.generation, "Session read ended after cancel");
                    } else {
                        warn!(
                            generation = %self.generation,
                            peer = self.peer(),
                            error = %e,
                            "Session disconnected"
                        );
                    }

                    self.close();
                    if let Some(manager) = self.manager.upgrade() {
                        manager.connection_lost(self.generation);
                    }
                    break;
                }
            }
        }

        self.close();
        debug!(generation = %self.generation, "END session");
    }
}
